pub mod types;

pub use types::{ArtifactRef, InMemoryRunRepository, OverrideRecord, PipelineRun, RejectedUnit, RunRepository, RunStatus,
                StageSlot, StageStatus};
