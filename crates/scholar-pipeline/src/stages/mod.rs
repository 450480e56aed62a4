//! Implementación de cada etapa sobre `StageOrchestrator`.
//!
//! Cada runner emite `StageStarted` al empezar y `StageFinished` al terminar;
//! un `Err` lo convierte el orquestador en `StageFailed`.
mod analysis;
mod export;
mod ingest;
mod statistics;
mod synthesis;

use scholar_core::{Artifact, PayloadDecodeError, PayloadSpec};

use crate::errors::PipelineError;
use crate::exec::CancellationFlag;

pub(crate) fn decode<P: PayloadSpec>(artifact: &Artifact) -> Result<P, PipelineError> {
    P::from_payload(&artifact.payload).map_err(|e| undecodable(&artifact.content_hash, e))
}

pub(crate) fn undecodable(hash: &str, e: PayloadDecodeError) -> PipelineError {
    PipelineError::Internal(format!("artifact {hash} is undecodable: {e}"))
}

/// Punto de control previo a cualquier publicación en el store.
pub(crate) fn ensure_not_cancelled(cancel: &CancellationFlag) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled(cancel.reason().unwrap_or_else(|| "cancelled".into())));
    }
    Ok(())
}
