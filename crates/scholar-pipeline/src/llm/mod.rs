//! Frontera con el LLM. El orquestador sólo conoce `LlmClient`; los
//! proveedores concretos viven detrás del trait.
mod command;
mod evaluator;
mod scripted;

use async_trait::async_trait;
use scholar_core::Stage;
use thiserror::Error;

pub use command::CommandLlmClient;
pub use evaluator::{evaluators_from_config, LlmEvaluator};
pub use scripted::ScriptedLlmClient;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LlmError {
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl LlmError {
    /// Timeout, rate limit e indisponibilidad se reintentan con backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Timeout(_) | LlmError::RateLimited(_) | LlmError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub stage: Stage,
    pub unit_id: Option<String>,
    /// Evaluador de la capa 5 que hace la petición; `None` para el productor
    /// primario.
    pub evaluator: Option<String>,
    pub prompt: String,
}

impl LlmRequest {
    pub fn new(stage: Stage, unit_id: Option<String>, prompt: impl Into<String>) -> Self {
        Self { stage,
               unit_id,
               evaluator: None,
               prompt: prompt.into() }
    }

    pub fn for_evaluator(mut self, name: impl Into<String>) -> Self {
        self.evaluator = Some(name.into());
        self
    }

    /// Clave estable de la petición: la unidad o, si no hay, la etapa;
    /// prefijada con `<evaluador>:` en las peticiones de validación cruzada.
    pub fn key(&self) -> String {
        let base = self.unit_id.clone().unwrap_or_else(|| self.stage.to_string());
        match &self.evaluator {
            Some(name) => format!("{name}:{base}"),
            None => base,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub finish_reason: Option<String>,
}

impl LlmResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(),
               finish_reason: Some("stop".into()) }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn get_name(&self) -> &str;

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}
