//! ScholarFlow
//!
//! Fachada del workspace:
//! - `scholar_core`: artifacts direccionados por contenido, eventos y replay.
//! - `scholar_quality`: QualityGate de seis capas.
//! - `scholar_export`: export verificado (CSV, reporte, manifiesto).
//! - `scholar_pipeline`: StageOrchestrator, LLM, reintentos y presupuesto.
//! - `scholar_persistence`: backend de ficheros.
//!
//! Puede usarse desde la CLI (`scholar`) o embebido en otros binarios.

use std::sync::Arc;

pub use scholar_core;
pub use scholar_export;
pub use scholar_persistence;
pub use scholar_pipeline;
pub use scholar_quality;

pub use scholar_core::{ArtifactStore, EventStore, InMemoryArtifactStore, InMemoryEventStore, IngestPayload, PipelineConfig,
                       PipelineRun, RunStatus, Stage};
pub use scholar_export::{ExportRecord, ExportValidator};
pub use scholar_persistence::{FsArtifactStore, FsEventStore, PersistenceError, StoreConfig};
pub use scholar_pipeline::{LlmClient, PipelineError, RunReport, StageOrchestrator};
pub use scholar_quality::QualityGate;

pub type InMemoryOrchestrator = StageOrchestrator<InMemoryArtifactStore, InMemoryEventStore>;
pub type FsOrchestrator = StageOrchestrator<FsArtifactStore, FsEventStore>;

/// Orquestador sobre stores en memoria (tests, dry runs).
pub fn in_memory(config: PipelineConfig, llm: Arc<dyn LlmClient>) -> Result<InMemoryOrchestrator, PipelineError> {
    StageOrchestrator::new(config,
                           Arc::new(InMemoryArtifactStore::new()),
                           Arc::new(InMemoryEventStore::new()),
                           llm)
}

/// Abre (o crea) los stores de ficheros bajo `store.root`.
pub fn open_stores(store: &StoreConfig) -> Result<(Arc<FsArtifactStore>, Arc<FsEventStore>), PersistenceError> {
    Ok((Arc::new(FsArtifactStore::open_with(store)?), Arc::new(FsEventStore::open_with(store)?)))
}
