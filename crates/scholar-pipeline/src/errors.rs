//! Errores del orquestador y su clasificación.
use scholar_core::{ConfigError, ErrorClass, RunStatus, Stage, StoreError};
use scholar_export::ExportError;
use thiserror::Error;
use uuid::Uuid;

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    #[error("inputs for {stage} are not ready: {detail}")]
    InputsNotReady { stage: Stage, detail: String },
    #[error("{stage} output failed the quality gate: {detail}")]
    QualityFailed { stage: Stage, detail: String },
    #[error("unknown run {0}")]
    UnknownRun(Uuid),
    #[error("run {run} is closed ({status})")]
    RunClosed { run: Uuid, status: RunStatus },
    #[error("artifact {0} is not flagged for review in this run")]
    NotFlagged(String),
    #[error("run cancelled: {0}")]
    Cancelled(String),
    #[error("llm: {0}")]
    Llm(#[from] LlmError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("export: {0}")]
    Export(#[from] ExportError),
    #[error("internal: {0}")]
    Internal(String),
}

/// Clasificación registrada en `StageFailed` y `UnitRejected`.
pub fn classify_error(e: &PipelineError) -> ErrorClass {
    match e {
        PipelineError::Llm(l) if l.is_transient() => ErrorClass::Transient,
        PipelineError::Llm(_) => ErrorClass::Quality,
        PipelineError::InputsNotReady { .. } | PipelineError::QualityFailed { .. } => ErrorClass::Quality,
        PipelineError::Store(s) => ErrorClass::from(s),
        PipelineError::Export(x) if x.is_integrity() => ErrorClass::Export,
        PipelineError::Export(_) => ErrorClass::Permanent,
        PipelineError::InvalidConfig(_)
        | PipelineError::UnknownRun(_)
        | PipelineError::RunClosed { .. }
        | PipelineError::NotFlagged(_)
        | PipelineError::Cancelled(_)
        | PipelineError::Internal(_) => ErrorClass::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_transient_and_integrity() {
        assert_eq!(classify_error(&PipelineError::Llm(LlmError::Timeout(100))), ErrorClass::Transient);
        assert_eq!(classify_error(&PipelineError::Llm(LlmError::Rejected("no".into()))), ErrorClass::Quality);
        let broken = StoreError::BrokenChain { missing: "a".into(),
                                               referenced_by: "b".into() };
        assert_eq!(classify_error(&PipelineError::Store(broken)), ErrorClass::Integrity);
        assert_eq!(classify_error(&PipelineError::InputsNotReady { stage: Stage::Statistics,
                                                                   detail: "x".into() }),
                   ErrorClass::Quality);
    }
}
