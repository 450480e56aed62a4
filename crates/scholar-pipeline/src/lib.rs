//! scholar-pipeline: orquestación de etapas sobre el store de artifacts.
//!
//! El orquestador no guarda estado mutable propio: cada decisión se toma
//! sobre el `PipelineRun` reconstruido desde el log de eventos.
pub mod errors;
pub mod exec;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
mod stages;
pub mod stats;

pub use errors::{classify_error, PipelineError};
pub use exec::{CancellationFlag, RateBudget};
pub use llm::{evaluators_from_config, CommandLlmClient, LlmClient, LlmError, LlmEvaluator, LlmRequest, LlmResponse, ScriptedLlmClient};
pub use orchestrator::{RunReport, StageOrchestrator};
pub use stats::{DescriptiveStatistics, StatisticsEngine};
