//! Tipos de evento del run y estructura `RunEvent`.
//!
//! Rol en el pipeline:
//! - El `StageOrchestrator` emite eventos a un `EventStore` append-only.
//! - `RunRepository` reconstruye el estado del run (replay) sin estructuras
//!   mutables compartidas.
//! - El enum `RunEventKind` es el contrato observable y estable del
//!   orquestador: se persiste tal cual en el backend de ficheros.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ErrorClass;
use crate::model::{LayerDiagnostic, QaOutcome, Stage};
use crate::repo::RunStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    /// Primer evento de todo run. Fija las etapas configuradas y el hash de
    /// la configuración.
    RunInitialized {
        config_hash: String,
        stages: Vec<Stage>,
        unit_count: usize,
        parent: Option<Uuid>,
    },
    /// Una etapa comenzó. No implica éxito.
    StageStarted { stage: Stage, fingerprint: String },
    /// Artifact aceptado por el store y asociado al run (nuevo o reutilizado
    /// de caché).
    ArtifactRecorded {
        stage: Stage,
        content_hash: String,
        unit_id: Option<String>,
        qa_outcome: QaOutcome,
        cached: bool,
    },
    /// Unidad descartada sin artifact (respuesta no parseable, entrada
    /// inválida o reintentos agotados).
    UnitRejected {
        stage: Stage,
        unit_id: String,
        class: ErrorClass,
        reason: String,
        diagnostics: Vec<LayerDiagnostic>,
    },
    RetryScheduled {
        stage: Stage,
        unit_id: Option<String>,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    StageFinished {
        stage: Stage,
        outputs: Vec<String>,
        fingerprint: String,
    },
    /// Fallo irrecuperable de una etapa; las dependientes se marcan skipped.
    StageFailed {
        stage: Stage,
        class: ErrorClass,
        error: String,
        fingerprint: String,
    },
    StageSkipped { stage: Stage, reason: String },
    OverrideGranted {
        content_hash: String,
        operator: String,
        note: String,
    },
    /// Registrado en el run padre cuando se abre una rama.
    BranchCreated { branch_id: Uuid, overrides: Vec<String> },
    RunCancelled { reason: String },
    /// Cierre con el status final. Ningún evento de etapa lo sigue.
    RunClosed { status: RunStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64, // asignado por el EventStore (orden append)
    pub run_id: Uuid,
    pub kind: RunEventKind,
    pub ts: DateTime<Utc>,
}
