//! Errores de persistencia.
//! Mapea errores de IO / serde a variantes semánticas y de ahí a `StoreError`.

use std::io;

use scholar_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("transient IO error: {0}")]
    TransientIo(String),
    #[error("io: {0}")]
    Io(String),
    #[error("corrupt file {path}: {detail}")]
    Corrupt { path: String, detail: String },
    #[error("serialization: {0}")]
    Serialization(String),
}

impl PersistenceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::TransientIo(_))
    }
}

impl From<io::Error> for PersistenceError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::TransientIo(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<PersistenceError> for StoreError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Serialization(s) => StoreError::Serialization(s),
            PersistenceError::Corrupt { path, detail } => StoreError::Integrity { key: path,
                                                                                 actual: format!("unreadable ({detail})") },
            other => StoreError::Backend(other.to_string()),
        }
    }
}
