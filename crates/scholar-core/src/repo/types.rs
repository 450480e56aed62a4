//! Estado reconstruido de un Pipeline Run (`PipelineRun`).
//!
//! El repositorio aplica un replay lineal: consume eventos en orden y
//! actualiza un `PipelineRun` por evento. No guarda artifacts completos, sólo
//! referencias por hash; el contenido vive en el `ArtifactStore`.
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ErrorClass;
use crate::event::{RunEvent, RunEventKind};
use crate::model::{QaOutcome, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Open,
    Complete,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Open => "open",
            RunStatus::Complete => "complete",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estado de una etapa en el run.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSlot {
    pub stage: Stage,
    pub status: StageStatus,
    pub fingerprint: Option<String>,
    pub outputs: Vec<String>, // sólo hashes
    pub error: Option<(ErrorClass, String)>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

/// Artifact asociado al run.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRef {
    pub stage: Stage,
    pub hash: String,
    pub unit_id: Option<String>,
    pub qa_outcome: QaOutcome,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedUnit {
    pub stage: Stage,
    pub unit_id: String,
    pub class: ErrorClass,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverrideRecord {
    pub content_hash: String,
    pub operator: String,
    pub note: String,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    pub config_hash: String,
    pub unit_count: usize,
    pub stages: Vec<StageSlot>,
    pub artifacts: Vec<ArtifactRef>,
    pub rejected: Vec<RejectedUnit>,
    pub overrides: Vec<OverrideRecord>,
    pub branches: Vec<Uuid>,
    pub retries: u32,
    pub cancelled: Option<String>,
    /// `Open` hasta `RunClosed`.
    pub status: RunStatus,
}

impl PipelineRun {
    pub fn slot(&self, stage: Stage) -> Option<&StageSlot> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    fn slot_mut(&mut self, stage: Stage) -> Option<&mut StageSlot> {
        self.stages.iter_mut().find(|s| s.stage == stage)
    }

    pub fn is_configured(&self, stage: Stage) -> bool {
        self.slot(stage).is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.status != RunStatus::Open
    }

    pub fn artifacts_of(&self, stage: Stage) -> impl Iterator<Item = &ArtifactRef> {
        self.artifacts.iter().filter(move |a| a.stage == stage)
    }

    pub fn artifact(&self, hash: &str) -> Option<&ArtifactRef> {
        self.artifacts.iter().find(|a| a.hash == hash)
    }

    pub fn is_overridden(&self, hash: &str) -> bool {
        self.overrides.iter().any(|o| o.content_hash == hash)
    }

    /// Un artifact es aceptado si pasó el gate o si está flagged y un
    /// operador lo liberó.
    pub fn is_accepted(&self, hash: &str) -> bool {
        match self.artifact(hash) {
            Some(a) => match a.qa_outcome {
                QaOutcome::Pass => true,
                QaOutcome::FlaggedForReview => self.is_overridden(hash),
                QaOutcome::Fail => false,
            },
            None => false,
        }
    }

    pub fn accepted(&self, stage: Stage) -> Vec<&ArtifactRef> {
        self.artifacts_of(stage).filter(|a| self.is_accepted(&a.hash)).collect()
    }

    /// Artifacts flagged que todavía esperan revisión manual.
    pub fn flagged_hashes(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .filter(|a| a.qa_outcome == QaOutcome::FlaggedForReview && !self.is_overridden(&a.hash))
            .map(|a| a.hash.clone())
            .collect()
    }

    /// Artifacts aceptados de las etapas derivadas (analysis, statistics,
    /// synthesis) que alimentan el export. Sus cadenas cubren el ingest.
    pub fn terminal_artifacts(&self) -> Vec<String> {
        [Stage::Analysis, Stage::Statistics, Stage::Synthesis].iter()
                                                              .flat_map(|s| self.accepted(*s))
                                                              .map(|a| a.hash.clone())
                                                              .collect()
    }

    fn ingested_units(&self) -> BTreeSet<&str> {
        self.artifacts_of(Stage::Ingest).filter_map(|a| a.unit_id.as_deref()).collect()
    }

    fn accepted_units(&self) -> BTreeSet<&str> {
        self.accepted(Stage::Analysis).into_iter().filter_map(|a| a.unit_id.as_deref()).collect()
    }

    /// Status que tendría el run si se cerrara ahora, asumiendo que un export
    /// en curso termina bien.
    pub fn projected_status(&self) -> RunStatus {
        let accepted = self.accepted_units();
        if accepted.is_empty() {
            return RunStatus::Failed;
        }
        if self.slot(Stage::Export).map(|s| s.status) == Some(StageStatus::Failed) {
            return RunStatus::Failed;
        }
        let stages_ok = self.stages.iter().all(|s| match s.stage {
                                              Stage::Export => s.status != StageStatus::Failed && s.status != StageStatus::Skipped,
                                              _ => s.status == StageStatus::Passed,
                                          });
        let ingested = self.ingested_units();
        let all_units = ingested.len() == self.unit_count && ingested.iter().all(|u| accepted.contains(u));
        if stages_ok && all_units && self.cancelled.is_none() {
            RunStatus::Complete
        } else {
            RunStatus::Partial
        }
    }

    /// Status registrado al cierre o, si el run sigue abierto, el proyectado.
    pub fn effective_status(&self) -> RunStatus {
        if self.is_closed() {
            self.status
        } else {
            self.projected_status()
        }
    }
}

/// Reconstruye (`replay`) el estado de un run a partir de sus eventos.
pub trait RunRepository {
    /// `None` si la secuencia no empieza con `RunInitialized`.
    fn load(&self, run_id: Uuid, events: &[RunEvent]) -> Option<PipelineRun>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryRunRepository;

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self
    }
}

impl RunRepository for InMemoryRunRepository {
    fn load(&self, run_id: Uuid, events: &[RunEvent]) -> Option<PipelineRun> {
        let (first, rest) = events.split_first()?;
        let RunEventKind::RunInitialized { config_hash,
                                           stages,
                                           unit_count,
                                           parent, } = &first.kind
        else {
            return None;
        };
        let mut run = PipelineRun { id: run_id,
                                    parent: *parent,
                                    config_hash: config_hash.clone(),
                                    unit_count: *unit_count,
                                    stages: stages.iter()
                                                  .map(|s| StageSlot { stage: *s,
                                                                       status: StageStatus::Pending,
                                                                       fingerprint: None,
                                                                       outputs: vec![],
                                                                       error: None,
                                                                       started_at: None,
                                                                       finished_at: None,
                                                                       attempts: 0 })
                                                  .collect(),
                                    artifacts: Vec::new(),
                                    rejected: Vec::new(),
                                    overrides: Vec::new(),
                                    branches: Vec::new(),
                                    retries: 0,
                                    cancelled: None,
                                    status: RunStatus::Open };
        let mut seen: HashSet<String> = HashSet::new();
        for ev in rest {
            match &ev.kind {
                RunEventKind::RunInitialized { .. } => {}
                RunEventKind::StageStarted { stage, fingerprint } => {
                    if let Some(slot) = run.slot_mut(*stage) {
                        slot.status = StageStatus::Running;
                        slot.fingerprint = Some(fingerprint.clone());
                        slot.started_at = Some(ev.ts);
                        slot.attempts += 1;
                    }
                }
                RunEventKind::ArtifactRecorded { stage,
                                                 content_hash,
                                                 unit_id,
                                                 qa_outcome,
                                                 cached, } => {
                    if seen.insert(content_hash.clone()) {
                        run.artifacts.push(ArtifactRef { stage: *stage,
                                                         hash: content_hash.clone(),
                                                         unit_id: unit_id.clone(),
                                                         qa_outcome: *qa_outcome,
                                                         cached: *cached });
                    }
                }
                RunEventKind::UnitRejected { stage,
                                             unit_id,
                                             class,
                                             reason,
                                             .. } => run.rejected.push(RejectedUnit { stage: *stage,
                                                                                      unit_id: unit_id.clone(),
                                                                                      class: *class,
                                                                                      reason: reason.clone() }),
                RunEventKind::RetryScheduled { .. } => run.retries += 1,
                RunEventKind::StageFinished { stage,
                                              outputs,
                                              fingerprint, } => {
                    if let Some(slot) = run.slot_mut(*stage) {
                        slot.status = StageStatus::Passed;
                        slot.outputs = outputs.clone();
                        slot.fingerprint = Some(fingerprint.clone());
                        slot.finished_at = Some(ev.ts);
                    }
                }
                RunEventKind::StageFailed { stage,
                                            class,
                                            error,
                                            fingerprint, } => {
                    if let Some(slot) = run.slot_mut(*stage) {
                        slot.status = StageStatus::Failed;
                        slot.error = Some((*class, error.clone()));
                        slot.fingerprint = Some(fingerprint.clone());
                        slot.finished_at = Some(ev.ts);
                    }
                }
                RunEventKind::StageSkipped { stage, .. } => {
                    if let Some(slot) = run.slot_mut(*stage) {
                        slot.status = StageStatus::Skipped;
                        slot.finished_at = Some(ev.ts);
                    }
                }
                RunEventKind::OverrideGranted { content_hash,
                                                operator,
                                                note, } => run.overrides.push(OverrideRecord { content_hash: content_hash.clone(),
                                                                                               operator: operator.clone(),
                                                                                               note: note.clone(),
                                                                                               granted_at: ev.ts }),
                RunEventKind::BranchCreated { branch_id, .. } => run.branches.push(*branch_id),
                RunEventKind::RunCancelled { reason } => run.cancelled = Some(reason.clone()),
                RunEventKind::RunClosed { status } => run.status = *status,
            }
        }
        Some(run)
    }
}
