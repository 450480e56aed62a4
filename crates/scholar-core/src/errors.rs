//! Errores del núcleo y su clasificación.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Stage;

/// Errores del `ArtifactStore`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    /// El payload almacenado no corresponde a su clave (corrupción o
    /// colisión).
    #[error("integrity failure for {key}: recomputed hash {actual}")]
    Integrity { key: String, actual: String },
    /// Mismo contenido con metadatos materialmente distintos (version skew).
    #[error("duplicate content {hash} with different metadata: {detail}")]
    DuplicateContent { hash: String, detail: String },
    #[error("broken chain: {missing} referenced by {referenced_by} is missing")]
    BrokenChain { missing: String, referenced_by: String },
    #[error("invalid dependencies for {stage} artifact: {detail}")]
    InvalidDependencies { stage: Stage, detail: String },
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, StoreError::Integrity { .. } | StoreError::BrokenChain { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Clasificación de errores registrada en los eventos `StageFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeouts / rate limit: se reintentan.
    Transient,
    /// Fallo estructural o estadístico detectado por el gate.
    Quality,
    /// Hash que no coincide o cadena rota.
    Integrity,
    /// Export vacío o con campos faltantes.
    Export,
    Permanent,
}

impl From<&StoreError> for ErrorClass {
    fn from(e: &StoreError) -> Self {
        match e {
            StoreError::Integrity { .. } | StoreError::BrokenChain { .. } | StoreError::DuplicateContent { .. } => {
                ErrorClass::Integrity
            }
            _ => ErrorClass::Permanent,
        }
    }
}
