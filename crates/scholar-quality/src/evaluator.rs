//! Evaluadores independientes para la validación cruzada (capa 5).
use std::collections::BTreeMap;

use async_trait::async_trait;
use scholar_core::FrameworkSpec;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluatorError {
    #[error("evaluator unavailable: {0}")]
    Unavailable(String),
    #[error("evaluator returned an unusable answer: {0}")]
    Invalid(String),
}

/// Entrada que recibe cada evaluador: la misma unidad que vio el productor
/// primario.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub unit_id: String,
    pub text: String,
    pub framework: FrameworkSpec,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn get_name(&self) -> &str;

    /// Puntuaciones por dimensión para la unidad.
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<BTreeMap<String, f64>, EvaluatorError>;
}

/// Evaluador que devuelve siempre las mismas puntuaciones. Sirve para
/// dry runs y tests.
#[derive(Debug, Clone)]
pub struct FixedEvaluator {
    name: String,
    scores: BTreeMap<String, f64>,
}

impl FixedEvaluator {
    pub fn new(name: impl Into<String>, scores: BTreeMap<String, f64>) -> Self {
        Self { name: name.into(),
               scores }
    }
}

#[async_trait]
impl Evaluator for FixedEvaluator {
    fn get_name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, _request: &EvaluationRequest) -> Result<BTreeMap<String, f64>, EvaluatorError> {
        Ok(self.scores.clone())
    }
}
