use log::{debug, info};
use scholar_core::model::ExcludedUnit;
use scholar_core::{AnalysisPayload, ArtifactDraft, ArtifactStore, EventStore, LayerVerdict, PayloadSpec, QaOutcome,
                   RunEventKind, Stage};
use uuid::Uuid;

use super::{decode, ensure_not_cancelled, undecodable};
use crate::errors::PipelineError;
use crate::orchestrator::StageOrchestrator;

impl<S, E> StageOrchestrator<S, E>
    where S: ArtifactStore + 'static,
          E: EventStore + 'static
{
    /// Estadísticas sobre los análisis aceptados. Las unidades excluidas
    /// (fallidas, flagged sin override o rechazadas) se listan con su motivo.
    pub(crate) async fn run_statistics(&self, run_id: Uuid) -> Result<bool, PipelineError> {
        let run = self.status(run_id)?;
        let accepted: Vec<String> = run.accepted(Stage::Analysis).into_iter().map(|a| a.hash.clone()).collect();
        let mut excluded: Vec<ExcludedUnit> =
            run.artifacts_of(Stage::Analysis)
               .filter(|a| !run.is_accepted(&a.hash))
               .map(|a| ExcludedUnit { unit_id: a.unit_id.clone().unwrap_or_else(|| a.hash.clone()),
                                       reason: format!("qa {}", a.qa_outcome) })
               .chain(run.rejected
                         .iter()
                         .filter(|r| r.stage == Stage::Analysis)
                         .map(|r| ExcludedUnit { unit_id: r.unit_id.clone(),
                                                 reason: r.reason.clone() }))
               .collect();
        excluded.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));

        let mut fingerprint_inputs = accepted.clone();
        fingerprint_inputs.extend(excluded.iter().map(|x| format!("excluded:{}", x.unit_id)));
        let fingerprint = self.config.stage_fingerprint(Stage::Statistics, &fingerprint_inputs);
        self.emit(run_id,
                  RunEventKind::StageStarted { stage: Stage::Statistics,
                                               fingerprint: fingerprint.clone() })?;

        let min_units = self.config.qa.min_units_for_statistics;
        if accepted.len() < min_units {
            return Err(PipelineError::InputsNotReady { stage: Stage::Statistics,
                                                       detail: format!("{} accepted analysis units, need {min_units}",
                                                                       accepted.len()) });
        }

        if let Some(cached) = self.store.find_by_input_fingerprint(&fingerprint)? {
            if cached.qa_outcome() == QaOutcome::Pass {
                debug!("run {run_id}: statistics cache hit {}", cached.content_hash);
                return self.finish_single(run_id, Stage::Statistics, cached.content_hash.clone(), cached.qa_outcome(), true, fingerprint);
            }
        }

        let mut inputs = Vec::with_capacity(accepted.len());
        for hash in &accepted {
            let artifact = self.store.retrieve(hash)?;
            inputs.push(decode::<AnalysisPayload>(&artifact)?);
        }
        let mut stats = self.statistics
                            .compute(&self.config.framework, &inputs)
                            .map_err(|e| PipelineError::QualityFailed { stage: Stage::Statistics,
                                                                        detail: format!("{}: {e}", self.statistics.get_name()) })?;
        stats.excluded_units = excluded;
        let qa = self.gate.check_statistics(&stats, &inputs);
        if !qa.is_pass() {
            let detail = qa.diagnostics
                           .iter()
                           .filter(|d| d.verdict != LayerVerdict::Pass)
                           .map(|d| format!("{}: {}", d.layer, d.detail))
                           .collect::<Vec<_>>()
                           .join("; ");
            return Err(PipelineError::QualityFailed { stage: Stage::Statistics,
                                                      detail });
        }

        ensure_not_cancelled(&self.cancel)?;
        let producer_version = self.config.producer_version(Stage::Statistics);
        let payload = stats.into_payload(&producer_version)
                           .map_err(|e| undecodable("statistics", e))?;
        let draft = ArtifactDraft::new(Stage::Statistics, payload, producer_version, qa)
            .with_dependencies(accepted)
            .with_input_fingerprint(fingerprint.clone());
        let artifact = self.store.store(draft)?;
        info!("run {run_id}: statistics over {} units -> {}", inputs.len(), artifact.content_hash);
        self.finish_single(run_id, Stage::Statistics, artifact.content_hash.clone(), artifact.qa_outcome(), false, fingerprint)
    }

    /// Registra el único artifact de una etapa agregada y la cierra.
    pub(crate) fn finish_single(&self,
                                run_id: Uuid,
                                stage: Stage,
                                hash: String,
                                qa_outcome: QaOutcome,
                                cached: bool,
                                fingerprint: String)
                                -> Result<bool, PipelineError> {
        self.emit(run_id,
                  RunEventKind::ArtifactRecorded { stage,
                                                   content_hash: hash.clone(),
                                                   unit_id: None,
                                                   qa_outcome,
                                                   cached })?;
        self.emit(run_id,
                  RunEventKind::StageFinished { stage,
                                                outputs: vec![hash],
                                                fingerprint })?;
        Ok(true)
    }
}
