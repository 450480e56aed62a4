//! scholar-quality: QualityGate de seis capas para salidas de LLM.
//!
//! Flujo por unidad:
//! 1. `check_input` antes de llamar al LLM (capa 1).
//! 2. `assess_unit` con la respuesta cruda (capas 2 a 5).
//! 3. `finalize_batch` cuando todas las unidades del run terminaron (capa 6).
pub mod evaluator;
pub mod gate;
pub mod layers;

pub use evaluator::{EvaluationRequest, Evaluator, EvaluatorError, FixedEvaluator};
pub use gate::{AssessedUnit, QualityGate, RawResponse, UnitAssessment};
