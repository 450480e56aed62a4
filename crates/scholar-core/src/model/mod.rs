//! Modelos neutrales (Artifact, Stage, QaResult, payloads tipados).

pub mod artifact;
pub mod payload;
pub mod qa;
pub mod stage;

pub use artifact::{Artifact, ArtifactDraft, MetadataRecord};
pub use payload::{envelope_producer_version, AnalysisPayload, ConfidenceLevel, DimensionStats, ExcludedUnit, IngestPayload,
                  PayloadDecodeError, PayloadSpec, StatisticsConfidence, StatisticsPayload, SynthesisPayload};
pub use qa::{LayerDiagnostic, LayerVerdict, QaLayer, QaOutcome, QaResult};
pub use stage::Stage;
