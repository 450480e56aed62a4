use scholar_core::{RunStatus, StoreError};
use thiserror::Error;

/// Motivo concreto de un `ExportIntegrity`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntegrityReason {
    #[error("provenance chain of {hash} is broken: {source}")]
    BrokenChain { hash: String, source: StoreError },
    #[error("artifact {hash} lacks required field {field}")]
    MissingField { hash: String, field: String },
    #[error("artifact {hash} cannot be decoded: {detail}")]
    Undecodable { hash: String, detail: String },
    #[error("refusing to write an empty table for a {status} run")]
    EmptyExport { status: RunStatus },
    #[error("file {file} hash mismatch: manifest {expected}, on disk {actual}")]
    FileHashMismatch { file: String, expected: String, actual: String },
    #[error("file {file} has {actual} rows, manifest says {expected}")]
    RowCountMismatch { file: String, expected: usize, actual: usize },
    #[error("manifest self-hash mismatch")]
    RecordHashMismatch,
    #[error("row references {hash}, which is not an upstream artifact of this export")]
    UnknownRow { hash: String },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export integrity: {0}")]
    ExportIntegrity(IntegrityReason),
    #[error("io: {0}")]
    Io(String),
    #[error("csv: {0}")]
    Csv(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

impl ExportError {
    pub fn integrity(reason: IntegrityReason) -> Self {
        ExportError::ExportIntegrity(reason)
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, ExportError::ExportIntegrity(_))
    }
}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        ExportError::Io(e.to_string())
    }
}

impl From<csv::Error> for ExportError {
    fn from(e: csv::Error) -> Self {
        ExportError::Csv(e.to_string())
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Serialization(e.to_string())
    }
}

impl From<std::fmt::Error> for ExportError {
    fn from(e: std::fmt::Error) -> Self {
        ExportError::Serialization(format!("report: {e}"))
    }
}
