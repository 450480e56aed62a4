use log::{debug, info, warn};
use scholar_core::{ArtifactDraft, ArtifactStore, EventStore, LayerVerdict, PayloadSpec, QaOutcome, RunEventKind, Stage,
                   StatisticsPayload, SynthesisPayload};
use uuid::Uuid;

use super::{decode, ensure_not_cancelled, undecodable};
use crate::errors::PipelineError;
use crate::exec::{call_with_retry, RateBudget, RetryNotice};
use crate::llm::LlmRequest;
use crate::orchestrator::StageOrchestrator;
use crate::prompt::{cited_hashes, synthesis_prompt};

impl<S, E> StageOrchestrator<S, E>
    where S: ArtifactStore + 'static,
          E: EventStore + 'static
{
    /// Narrativa sobre las estadísticas aceptadas. Una narrativa que no pasa
    /// la capa 2 no se almacena.
    pub(crate) async fn run_synthesis(&self, run_id: Uuid, budget: &RateBudget) -> Result<bool, PipelineError> {
        let run = self.status(run_id)?;
        let statistics_hash = run.accepted(Stage::Statistics)
                                 .first()
                                 .map(|a| a.hash.clone())
                                 .ok_or_else(|| PipelineError::InputsNotReady { stage: Stage::Synthesis,
                                                                                detail: "no accepted statistics artifact".into() })?;
        let fingerprint = self.config.stage_fingerprint(Stage::Synthesis, std::slice::from_ref(&statistics_hash));
        self.emit(run_id,
                  RunEventKind::StageStarted { stage: Stage::Synthesis,
                                               fingerprint: fingerprint.clone() })?;

        if let Some(cached) = self.store.find_by_input_fingerprint(&fingerprint)? {
            if cached.qa_outcome() == QaOutcome::Pass {
                debug!("run {run_id}: synthesis cache hit {}", cached.content_hash);
                return self.finish_single(run_id, Stage::Synthesis, cached.content_hash.clone(), cached.qa_outcome(), true, fingerprint);
            }
        }

        let stats: StatisticsPayload = decode(&self.store.retrieve(&statistics_hash)?)?;
        let request = LlmRequest::new(Stage::Synthesis,
                                      None,
                                      synthesis_prompt(&self.config.framework, &statistics_hash, &stats));
        let llm = self.llm.as_ref();
        let req = &request;
        let on_retry = |n: &RetryNotice| {
            let kind = RunEventKind::RetryScheduled { stage: Stage::Synthesis,
                                                      unit_id: None,
                                                      attempt: n.attempt,
                                                      delay_ms: n.delay_ms,
                                                      error: n.error.to_string() };
            if let Err(e) = self.events.append_kind(run_id, kind) {
                warn!("run {run_id}: could not record synthesis retry: {e}");
            }
        };
        let response = call_with_retry(&self.config.retry, &self.cancel, on_retry, move || async move {
                           let _permit = budget.acquire().await?;
                           llm.complete(req).await
                       }).await?;

        let synthesis = SynthesisPayload { title: format!("{} synthesis", self.config.framework.name),
                                           cited_hashes: cited_hashes(&response.text),
                                           narrative: response.text,
                                           statistics_hash: statistics_hash.clone() };
        // Sólo se pueden citar artifacts aceptados; un flagged sin override no.
        let known: Vec<String> = run.artifacts
                                    .iter()
                                    .filter(|a| run.is_accepted(&a.hash))
                                    .map(|a| a.hash.clone())
                                    .collect();
        let qa = self.gate.check_synthesis(&synthesis, response.finish_reason.as_deref(), &known);
        if !qa.is_pass() {
            let detail = qa.diagnostics
                           .iter()
                           .filter(|d| d.verdict != LayerVerdict::Pass)
                           .map(|d| d.detail.clone())
                           .collect::<Vec<_>>()
                           .join("; ");
            return Err(PipelineError::QualityFailed { stage: Stage::Synthesis,
                                                      detail });
        }

        ensure_not_cancelled(&self.cancel)?;
        let producer_version = self.config.producer_version(Stage::Synthesis);
        let payload = synthesis.into_payload(&producer_version)
                               .map_err(|e| undecodable("synthesis", e))?;
        let draft = ArtifactDraft::new(Stage::Synthesis, payload, producer_version, qa)
            .with_dependencies([statistics_hash])
            .with_input_fingerprint(fingerprint.clone());
        let artifact = self.store.store(draft)?;
        info!("run {run_id}: synthesis -> {} ({} citations)", artifact.content_hash, synthesis.cited_hashes.len());
        self.finish_single(run_id, Stage::Synthesis, artifact.content_hash.clone(), artifact.qa_outcome(), false, fingerprint)
    }
}
