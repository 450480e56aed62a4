//! StageOrchestrator: máquina de estados `ingest → analysis → statistics →
//! synthesis → export`, una instancia de `PipelineRun` por ejecución.
//!
//! Reglas:
//! - El estado del run no se guarda mutable: se reconstruye de su log de
//!   eventos con `RunRepository` antes de cada decisión.
//! - Una etapa sólo empieza si la etapa de la que declara sus entradas quedó
//!   `Passed`. Si no, se registra `StageSkipped`.
//! - Statistics y synthesis son degradables: su fallo marca las dependientes
//!   como skipped y el export continúa con lo que haya. El fallo de ingest o
//!   analysis deja el run `failed` sin export.
//! - La cancelación se consulta entre etapas y antes de publicar cada
//!   artifact.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use scholar_core::{ArtifactStore, ErrorClass, EventStore, InMemoryRunRepository, IngestPayload, PipelineConfig, PipelineRun,
                   QaOutcome, RunEventKind, RunRepository, RunStatus, Stage, StageStatus};
use scholar_export::{ExportRecord, ExportValidator};
use scholar_quality::QualityGate;
use uuid::Uuid;

use crate::errors::{classify_error, PipelineError};
use crate::exec::{CancellationFlag, RateBudget};
use crate::llm::{evaluators_from_config, LlmClient};
use crate::stats::{DescriptiveStatistics, StatisticsEngine};

/// Resultado visible de un run (o rama) terminado.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: PipelineRun,
    pub export: Option<ExportRecord>,
    pub export_dir: Option<PathBuf>,
}

impl RunReport {
    pub fn run_id(&self) -> Uuid {
        self.run.id
    }

    pub fn status(&self) -> RunStatus {
        self.run.effective_status()
    }

    /// Artifacts flagged pendientes de revisión, por content_hash.
    pub fn flagged(&self) -> Vec<String> {
        self.run.flagged_hashes()
    }
}

pub struct StageOrchestrator<S, E>
    where S: ArtifactStore + 'static,
          E: EventStore + 'static
{
    pub(crate) config: PipelineConfig,
    pub(crate) store: Arc<S>,
    pub(crate) events: Arc<E>,
    pub(crate) repo: InMemoryRunRepository,
    pub(crate) gate: Arc<QualityGate>,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) statistics: Arc<dyn StatisticsEngine>,
    pub(crate) cancel: CancellationFlag,
    pub(crate) export_root: PathBuf,
}

impl<S, E> StageOrchestrator<S, E>
    where S: ArtifactStore + 'static,
          E: EventStore + 'static
{
    pub fn new(config: PipelineConfig, store: Arc<S>, events: Arc<E>, llm: Arc<dyn LlmClient>) -> Result<Self, PipelineError> {
        config.validate()?;
        let gate = evaluators_from_config(&config, &llm).into_iter()
                                                         .fold(QualityGate::from_config(&config), QualityGate::with_evaluator);
        Ok(Self { config,
                  store,
                  events,
                  repo: InMemoryRunRepository::new(),
                  gate: Arc::new(gate),
                  llm,
                  statistics: Arc::new(DescriptiveStatistics),
                  cancel: CancellationFlag::new(),
                  export_root: PathBuf::from("exports") })
    }

    /// Reemplaza el gate, incluidos los evaluadores tomados de la
    /// configuración.
    pub fn with_gate(mut self, gate: QualityGate) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    pub fn with_statistics_engine(mut self, engine: Arc<dyn StatisticsEngine>) -> Self {
        self.statistics = engine;
        self
    }

    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Directorio bajo el cual cada run exporta a `<root>/<run_id>/`.
    pub fn with_export_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.export_root = root.into();
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn export_dir_for(&self, run_id: Uuid) -> PathBuf {
        self.export_root.join(run_id.to_string())
    }

    pub(crate) fn emit(&self, run_id: Uuid, kind: RunEventKind) -> Result<(), PipelineError> {
        self.events.append_kind(run_id, kind)?;
        Ok(())
    }

    /// Estado actual del run reconstruido desde sus eventos.
    pub fn status(&self, run_id: Uuid) -> Result<PipelineRun, PipelineError> {
        let events = self.events.list(run_id)?;
        self.repo.load(run_id, &events).ok_or(PipelineError::UnknownRun(run_id))
    }

    /// Runs conocidos por el log de eventos, en orden de creación.
    pub fn runs(&self) -> Result<Vec<PipelineRun>, PipelineError> {
        let mut out = Vec::new();
        for id in self.events.run_ids()? {
            out.push(self.status(id)?);
        }
        Ok(out)
    }

    /// Ejecuta el pipeline completo sobre un corpus.
    pub async fn run(&self, documents: Vec<IngestPayload>) -> Result<RunReport, PipelineError> {
        if documents.is_empty() {
            return Err(PipelineError::InputsNotReady { stage: Stage::Ingest,
                                                       detail: "empty corpus".into() });
        }
        let mut seen = HashSet::new();
        if let Some(dup) = documents.iter().find(|d| !seen.insert(d.unit_id.clone())) {
            return Err(PipelineError::InputsNotReady { stage: Stage::Ingest,
                                                       detail: format!("duplicate unit_id {}", dup.unit_id) });
        }
        let run_id = Uuid::new_v4();
        self.emit(run_id,
                  RunEventKind::RunInitialized { config_hash: self.config.config_hash(),
                                                 stages: self.config.stages.clone(),
                                                 unit_count: documents.len(),
                                                 parent: None })?;
        info!("run {run_id}: started over {} documents ({})", documents.len(), self.config.name);
        let budget = RateBudget::new(&self.config.rate_limit);
        let ingest = self.run_ingest(run_id, &documents);
        self.guarded(run_id, Stage::Ingest, ingest)?;
        self.drive(run_id, Stage::Analysis, &budget).await
    }

    /// Registra un override de operador sobre un artifact flagged del run.
    pub fn grant_override(&self, run_id: Uuid, content_hash: &str, operator: &str, note: &str) -> Result<(), PipelineError> {
        let run = self.status(run_id)?;
        let flagged = run.artifact(content_hash)
                         .map(|a| a.qa_outcome == QaOutcome::FlaggedForReview && !run.is_overridden(content_hash))
                         .unwrap_or(false);
        if !flagged {
            return Err(PipelineError::NotFlagged(content_hash.to_string()));
        }
        self.emit(run_id,
                  RunEventKind::OverrideGranted { content_hash: content_hash.to_string(),
                                                  operator: operator.to_string(),
                                                  note: note.to_string() })?;
        info!("run {run_id}: override granted on {content_hash} by {operator}");
        Ok(())
    }

    /// Abre una rama del run `parent_id`: reutiliza sus artifacts de ingest y
    /// analysis (sin llamadas LLM), hereda overrides y rechazos, y recalcula
    /// statistics → synthesis → export.
    pub async fn branch(&self, parent_id: Uuid) -> Result<RunReport, PipelineError> {
        let parent = self.status(parent_id)?;
        let parent_events = self.events.list(parent_id)?;
        let branch_id = Uuid::new_v4();
        self.emit(branch_id,
                  RunEventKind::RunInitialized { config_hash: self.config.config_hash(),
                                                 stages: self.config.stages.clone(),
                                                 unit_count: parent.unit_count,
                                                 parent: Some(parent_id) })?;
        for stage in [Stage::Ingest, Stage::Analysis] {
            let fingerprint = parent.slot(stage)
                                    .and_then(|s| s.fingerprint.clone())
                                    .unwrap_or_default();
            self.emit(branch_id,
                      RunEventKind::StageStarted { stage,
                                                   fingerprint: fingerprint.clone() })?;
            let mut outputs = Vec::new();
            for a in parent.artifacts_of(stage) {
                outputs.push(a.hash.clone());
                self.emit(branch_id,
                          RunEventKind::ArtifactRecorded { stage,
                                                           content_hash: a.hash.clone(),
                                                           unit_id: a.unit_id.clone(),
                                                           qa_outcome: a.qa_outcome,
                                                           cached: true })?;
            }
            for ev in &parent_events {
                if let RunEventKind::UnitRejected { stage: s, .. } = &ev.kind {
                    if *s == stage {
                        self.emit(branch_id, ev.kind.clone())?;
                    }
                }
            }
            self.emit(branch_id,
                      RunEventKind::StageFinished { stage,
                                                    outputs,
                                                    fingerprint })?;
        }
        for o in &parent.overrides {
            self.emit(branch_id,
                      RunEventKind::OverrideGranted { content_hash: o.content_hash.clone(),
                                                      operator: o.operator.clone(),
                                                      note: o.note.clone() })?;
        }
        self.emit(parent_id,
                  RunEventKind::BranchCreated { branch_id,
                                                overrides: parent.overrides.iter().map(|o| o.content_hash.clone()).collect() })?;
        info!("run {parent_id}: branched into {branch_id}");
        let budget = RateBudget::new(&self.config.rate_limit);
        self.drive(branch_id, Stage::Statistics, &budget).await
    }

    /// Re-exporta un run desde sus artifacts existentes, sin recomputar nada.
    pub fn export_run(&self, run_id: Uuid, out_dir: &Path) -> Result<ExportRecord, PipelineError> {
        let run = self.status(run_id)?;
        let record = ExportValidator::new(self.store.as_ref()).export(&run, &self.config.framework, out_dir)?;
        Ok(record)
    }

    /// Verifica las cadenas de procedencia de los artifacts terminales del run.
    pub fn verify_run(&self, run_id: Uuid) -> Result<usize, PipelineError> {
        let run = self.status(run_id)?;
        let mut checked = 0;
        for hash in run.terminal_artifacts() {
            checked += self.store.verify_chain(&hash)?;
        }
        Ok(checked)
    }

    /// Procesa el resultado de una etapa: registra `StageFailed` si falló y
    /// devuelve si el run puede seguir con sus dependientes.
    fn guarded(&self, run_id: Uuid, stage: Stage, result: Result<bool, PipelineError>) -> Result<bool, PipelineError> {
        match result {
            Ok(passed) => Ok(passed),
            Err(PipelineError::Cancelled(reason)) => {
                warn!("run {run_id}: cancelled during {stage}: {reason}");
                self.emit(run_id,
                          RunEventKind::RunCancelled { reason: reason.clone() })?;
                let fingerprint = self.status(run_id)?
                                      .slot(stage)
                                      .and_then(|s| s.fingerprint.clone())
                                      .unwrap_or_default();
                self.emit(run_id,
                          RunEventKind::StageFailed { stage,
                                                      class: ErrorClass::Permanent,
                                                      error: format!("cancelled: {reason}"),
                                                      fingerprint })?;
                Ok(false)
            }
            Err(e) => {
                let class = classify_error(&e);
                warn!("run {run_id}: stage {stage} failed ({class:?}): {e}");
                let fingerprint = self.status(run_id)?
                                      .slot(stage)
                                      .and_then(|s| s.fingerprint.clone())
                                      .unwrap_or_default();
                self.emit(run_id,
                          RunEventKind::StageFailed { stage,
                                                      class,
                                                      error: e.to_string(),
                                                      fingerprint })?;
                Ok(false)
            }
        }
    }

    /// Ejecuta las etapas configuradas desde `from`, aplicando degradación.
    async fn drive(&self, run_id: Uuid, from: Stage, budget: &RateBudget) -> Result<RunReport, PipelineError> {
        let stages: Vec<Stage> = self.config.stages.iter().copied().filter(|s| *s >= from).collect();
        let mut export = None;
        for stage in stages {
            let run = self.status(run_id)?;
            if self.cancel.is_cancelled() {
                if run.cancelled.is_none() {
                    let reason = self.cancel.reason().unwrap_or_else(|| "cancelled".into());
                    self.emit(run_id, RunEventKind::RunCancelled { reason })?;
                }
                self.emit(run_id,
                          RunEventKind::StageSkipped { stage,
                                                       reason: "run cancelled".into() })?;
                continue;
            }
            if let Some(reason) = blocked_reason(&run, stage) {
                info!("run {run_id}: skipping {stage}: {reason}");
                self.emit(run_id, RunEventKind::StageSkipped { stage, reason })?;
                continue;
            }
            let result = match stage {
                Stage::Ingest => Ok(true),
                Stage::Analysis => self.run_analysis(run_id, budget).await,
                Stage::Statistics => self.run_statistics(run_id).await,
                Stage::Synthesis => self.run_synthesis(run_id, budget).await,
                Stage::Export => match self.run_export(run_id) {
                    Ok(record) => {
                        export = Some(record);
                        Ok(true)
                    }
                    Err(e) => Err(e),
                },
            };
            self.guarded(run_id, stage, result)?;
        }
        let export_dir = export.as_ref().map(|_| self.export_dir_for(run_id));
        let mut report = self.close(run_id, export)?;
        report.export_dir = export_dir;
        Ok(report)
    }

    fn close(&self, run_id: Uuid, export: Option<ExportRecord>) -> Result<RunReport, PipelineError> {
        let run = self.status(run_id)?;
        let status = run.projected_status();
        self.emit(run_id, RunEventKind::RunClosed { status })?;
        let run = self.status(run_id)?;
        let flagged = run.flagged_hashes();
        info!("run {run_id}: closed as {status} ({} artifacts, {} flagged, {} rejected)",
              run.artifacts.len(),
              flagged.len(),
              run.rejected.len());
        for h in &flagged {
            warn!("run {run_id}: flagged for review: {h}");
        }
        Ok(RunReport { run,
                       export,
                       export_dir: None })
    }
}

/// Motivo para no iniciar `stage`, si lo hay.
fn blocked_reason(run: &PipelineRun, stage: Stage) -> Option<String> {
    let failed = |s: Stage| {
        run.slot(s)
           .map(|slot| matches!(slot.status, StageStatus::Failed | StageStatus::Skipped))
           .unwrap_or(false)
    };
    match stage {
        Stage::Export => [Stage::Ingest, Stage::Analysis].into_iter()
                                                          .find(|s| failed(*s))
                                                          .map(|s| format!("critical stage {s} did not pass")),
        _ => {
            let input = stage.declared_input()?;
            match run.slot(input).map(|s| s.status) {
                Some(StageStatus::Passed) => None,
                Some(other) => Some(format!("upstream {input} is {other:?}")),
                None => Some(format!("upstream {input} not configured")),
            }
        }
    }
}
