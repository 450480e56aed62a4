//! scholar-core: artifacts direccionados por contenido, log de eventos del
//! run y replay de su estado.
pub mod config;
pub mod constants;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod model;
pub mod repo;
pub mod store;

pub use config::{ConfigError, EvaluatorConfig, FrameworkSpec, LlmCommand, PipelineConfig, QaThresholds, RateLimit, RetryPolicy};
pub use errors::{ErrorClass, StoreError};
pub use event::{EventStore, InMemoryEventStore, RunEvent, RunEventKind};
pub use model::{AnalysisPayload, Artifact, ArtifactDraft, IngestPayload, LayerDiagnostic, LayerVerdict, MetadataRecord,
                PayloadDecodeError, PayloadSpec, QaLayer, QaOutcome, QaResult, Stage, StatisticsPayload, SynthesisPayload};
pub use repo::{ArtifactRef, InMemoryRunRepository, PipelineRun, RunRepository, RunStatus, StageStatus};
pub use store::{ArtifactStore, InMemoryArtifactStore, InsertOutcome};
