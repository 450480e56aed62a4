//! Etapa de análisis: una llamada LLM por unidad, en paralelo sobre un
//! `JoinSet` acotado por el `RateBudget`.
//!
//! Orden por unidad:
//! 1. Caché por fingerprint (artifact previo con `pass`: sin llamada LLM).
//! 2. Capa 1 del gate antes de gastar una llamada.
//! 3. Llamada con reintentos; cada reintento queda como `RetryScheduled`.
//! 4. Capas 2 a 5 sobre la respuesta completa.
//!
//! La capa 6 se aplica tras la barrera de join, sobre las unidades frescas.
use std::sync::Arc;

use log::{debug, info, warn};
use scholar_core::{ArtifactDraft, ArtifactStore, ErrorClass, EventStore, IngestPayload, LayerDiagnostic, PayloadSpec,
                   QaOutcome, RetryPolicy, RunEventKind, Stage};
use scholar_quality::{AssessedUnit, QualityGate, RawResponse, UnitAssessment};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::{decode, ensure_not_cancelled, undecodable};
use crate::errors::PipelineError;
use crate::exec::{call_with_retry, CancellationFlag, RateBudget, RetryNotice};
use crate::llm::{LlmClient, LlmRequest};
use crate::orchestrator::StageOrchestrator;
use crate::prompt::analysis_prompt;

/// Lo que cada worker necesita, clonado desde el orquestador.
struct UnitContext<E> {
    run_id: Uuid,
    gate: Arc<QualityGate>,
    llm: Arc<dyn LlmClient>,
    events: Arc<E>,
    budget: RateBudget,
    retry: RetryPolicy,
    cancel: CancellationFlag,
}

struct PendingUnit {
    doc: IngestPayload,
    ingest_hash: String,
    fingerprint: String,
}

enum UnitOutcome {
    Assessed {
        ingest_hash: String,
        fingerprint: String,
        unit: AssessedUnit,
    },
    Rejected {
        unit_id: String,
        class: ErrorClass,
        reason: String,
        diagnostics: Vec<LayerDiagnostic>,
    },
    /// Cancelado antes de obtener una respuesta; no deja rastro.
    Abandoned { unit_id: String },
}

async fn analyze_unit<E: EventStore>(ctx: UnitContext<E>, pending: PendingUnit) -> UnitOutcome {
    let PendingUnit { doc,
                      ingest_hash,
                      fingerprint, } = pending;
    let l1 = ctx.gate.check_input(&doc.text);
    if l1.is_fail() {
        return UnitOutcome::Rejected { unit_id: doc.unit_id.clone(),
                                       class: ErrorClass::Quality,
                                       reason: l1.detail.clone(),
                                       diagnostics: ctx.gate.input_rejection(l1) };
    }
    if ctx.cancel.is_cancelled() {
        return UnitOutcome::Abandoned { unit_id: doc.unit_id };
    }

    let request = LlmRequest::new(Stage::Analysis,
                                  Some(doc.unit_id.clone()),
                                  analysis_prompt(ctx.gate.framework(), &doc));
    let budget = &ctx.budget;
    let llm = ctx.llm.as_ref();
    let req = &request;
    let events = &ctx.events;
    let on_retry = |n: &RetryNotice| {
        let kind = RunEventKind::RetryScheduled { stage: Stage::Analysis,
                                                  unit_id: Some(doc.unit_id.clone()),
                                                  attempt: n.attempt,
                                                  delay_ms: n.delay_ms,
                                                  error: n.error.to_string() };
        if let Err(e) = events.append_kind(ctx.run_id, kind) {
            warn!("run {}: could not record retry for {}: {e}", ctx.run_id, doc.unit_id);
        }
    };
    let response = call_with_retry(&ctx.retry, &ctx.cancel, on_retry, move || async move {
                       let _permit = budget.acquire().await?;
                       llm.complete(req).await
                   }).await;

    let response = match response {
        Ok(r) => r,
        Err(_) if ctx.cancel.is_cancelled() => return UnitOutcome::Abandoned { unit_id: doc.unit_id },
        Err(e) => {
            let class = if e.is_transient() { ErrorClass::Transient } else { ErrorClass::Quality };
            let reason = e.to_string();
            return UnitOutcome::Rejected { unit_id: doc.unit_id.clone(),
                                           class,
                                           diagnostics: ctx.gate.exhausted_rejection(l1, &reason),
                                           reason };
        }
    };
    let raw = RawResponse { text: response.text,
                            finish_reason: response.finish_reason };
    match ctx.gate.assess_unit(&doc.unit_id, &doc.text, &raw).await {
        UnitAssessment::Rejected { reason, diagnostics } => UnitOutcome::Rejected { unit_id: doc.unit_id.clone(),
                                                                                    class: ErrorClass::Quality,
                                                                                    reason,
                                                                                    diagnostics },
        UnitAssessment::Assessed(unit) => UnitOutcome::Assessed { ingest_hash,
                                                                  fingerprint,
                                                                  unit },
    }
}

impl<S, E> StageOrchestrator<S, E>
    where S: ArtifactStore + 'static,
          E: EventStore + 'static
{
    pub(crate) async fn run_analysis(&self, run_id: Uuid, budget: &RateBudget) -> Result<bool, PipelineError> {
        let run = self.status(run_id)?;
        let inputs: Vec<String> = run.artifacts_of(Stage::Ingest).map(|a| a.hash.clone()).collect();
        let stage_fingerprint = self.config.stage_fingerprint(Stage::Analysis, &inputs);
        self.emit(run_id,
                  RunEventKind::StageStarted { stage: Stage::Analysis,
                                               fingerprint: stage_fingerprint.clone() })?;

        let mut outputs = Vec::new();
        let mut workers = JoinSet::new();
        for ingest_hash in inputs {
            let fingerprint = self.config.stage_fingerprint(Stage::Analysis, std::slice::from_ref(&ingest_hash));
            let ingest = self.store.retrieve(&ingest_hash)?;
            let doc: IngestPayload = decode(&ingest)?;
            if let Some(cached) = self.store.find_by_input_fingerprint(&fingerprint)? {
                if cached.qa_outcome() == QaOutcome::Pass && cached.dependency_hashes == [ingest_hash.clone()] {
                    debug!("run {run_id}: analysis cache hit for {}", doc.unit_id);
                    self.emit(run_id,
                              RunEventKind::ArtifactRecorded { stage: Stage::Analysis,
                                                               content_hash: cached.content_hash.clone(),
                                                               unit_id: Some(doc.unit_id),
                                                               qa_outcome: cached.qa_outcome(),
                                                               cached: true })?;
                    outputs.push(cached.content_hash);
                    continue;
                }
            }
            let ctx = UnitContext { run_id,
                                    gate: Arc::clone(&self.gate),
                                    llm: Arc::clone(&self.llm),
                                    events: Arc::clone(&self.events),
                                    budget: budget.clone(),
                                    retry: self.config.retry.clone(),
                                    cancel: self.cancel.clone() };
            workers.spawn(analyze_unit(ctx,
                                       PendingUnit { doc,
                                                     ingest_hash,
                                                     fingerprint }));
        }

        // Barrera: todas las unidades alcanzan un estado terminal.
        let mut fresh = Vec::new();
        let mut rejected = Vec::new();
        let mut abandoned = 0usize;
        while let Some(joined) = workers.join_next().await {
            match joined.map_err(|e| PipelineError::Internal(format!("analysis worker: {e}")))? {
                UnitOutcome::Assessed { ingest_hash,
                                        fingerprint,
                                        unit, } => fresh.push((ingest_hash, fingerprint, unit)),
                UnitOutcome::Rejected { unit_id,
                                        class,
                                        reason,
                                        diagnostics, } => rejected.push((unit_id, class, reason, diagnostics)),
                UnitOutcome::Abandoned { unit_id } => {
                    debug!("run {run_id}: {unit_id} abandoned after cancellation");
                    abandoned += 1;
                }
            }
        }
        fresh.sort_by(|a, b| a.2.unit_id.cmp(&b.2.unit_id));
        rejected.sort_by(|a, b| a.0.cmp(&b.0));

        let units: Vec<AssessedUnit> = fresh.iter().map(|(_, _, u)| u.clone()).collect();
        let results = self.gate.finalize_batch(&units);
        let producer_version = self.config.producer_version(Stage::Analysis);
        for ((ingest_hash, fingerprint, unit), qa) in fresh.into_iter().zip(results) {
            ensure_not_cancelled(&self.cancel)?;
            let payload = unit.payload
                              .into_payload(&producer_version)
                              .map_err(|e| undecodable(&unit.unit_id, e))?;
            let draft = ArtifactDraft::new(Stage::Analysis, payload, producer_version.clone(), qa)
                .with_dependencies([ingest_hash])
                .with_input_fingerprint(fingerprint);
            let artifact = self.store.store(draft)?;
            if artifact.qa_outcome() != QaOutcome::Pass {
                info!("run {run_id}: {} stored as {}", unit.unit_id, artifact.qa_outcome());
            }
            self.emit(run_id,
                      RunEventKind::ArtifactRecorded { stage: Stage::Analysis,
                                                       content_hash: artifact.content_hash.clone(),
                                                       unit_id: Some(unit.unit_id),
                                                       qa_outcome: artifact.qa_outcome(),
                                                       cached: false })?;
            outputs.push(artifact.content_hash);
        }
        for (unit_id, class, reason, diagnostics) in rejected {
            warn!("run {run_id}: {unit_id} rejected ({class:?}): {reason}");
            self.emit(run_id,
                      RunEventKind::UnitRejected { stage: Stage::Analysis,
                                                   unit_id,
                                                   class,
                                                   reason,
                                                   diagnostics })?;
        }
        if abandoned > 0 {
            ensure_not_cancelled(&self.cancel)?;
        }

        let run = self.status(run_id)?;
        let accepted = run.accepted(Stage::Analysis).len();
        info!("run {run_id}: analysis finished, {accepted} accepted of {}", run.unit_count);
        if accepted == 0 {
            return Err(PipelineError::QualityFailed { stage: Stage::Analysis,
                                                      detail: "no unit passed the quality gate".into() });
        }
        self.emit(run_id,
                  RunEventKind::StageFinished { stage: Stage::Analysis,
                                                outputs,
                                                fingerprint: stage_fingerprint })?;
        Ok(true)
    }
}
