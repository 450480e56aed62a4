use std::sync::Arc;

use async_trait::async_trait;
use scholar_core::{ArtifactStore, ErrorClass, EvaluatorConfig, EventStore, FrameworkSpec, InMemoryArtifactStore,
                   InMemoryEventStore, IngestPayload, LayerVerdict, PipelineConfig, PipelineRun, QaLayer, QaOutcome, QaResult,
                   RetryPolicy, RunEventKind, RunStatus, Stage, StageStatus};
use scholar_export::{ExportValidator, TABLE_FILE};
use scholar_pipeline::{CancellationFlag, LlmClient, LlmError, LlmRequest, LlmResponse, PipelineError, ScriptedLlmClient,
                       StageOrchestrator};
use tempfile::TempDir;

const NARRATIVE: &str = "# Findings\n\nClaims dominate the corpus while reciprocity stays low.\n";

fn framework() -> FrameworkSpec {
    FrameworkSpec { name: "deliberation".into(),
                    version: "1".into(),
                    dimensions: vec!["claims".into(), "evidence".into(), "reciprocity".into()],
                    score_min: 0.0,
                    score_max: 10.0,
                    default_score: 0.0 }
}

fn config() -> PipelineConfig {
    let mut cfg = PipelineConfig::new("test", framework(), 0.5);
    cfg.retry = RetryPolicy { max_retries: 2,
                              base_delay_ms: 1,
                              max_delay_ms: 2 };
    cfg
}

fn doc(id: &str) -> IngestPayload {
    IngestPayload { unit_id: id.into(),
                    title: Some(format!("Document {id}")),
                    text: format!("Transcript {id}: a public debate about the regional water budget.") }
}

fn docs() -> Vec<IngestPayload> {
    vec![doc("u1"), doc("u2"), doc("u3")]
}

fn answer(scores: [f64; 3]) -> String {
    let total: f64 = scores.iter().sum();
    format!(r#"{{"scores":{{"claims":{},"evidence":{},"reciprocity":{}}},"derived":{{"claims":{},"evidence":{},"reciprocity":{}}},"rationale":"ok"}}"#,
            scores[0],
            scores[1],
            scores[2],
            scores[0] / total,
            scores[1] / total,
            scores[2] / total)
}

fn scripted() -> ScriptedLlmClient {
    ScriptedLlmClient::new().with_response("u1", answer([2.0, 5.0, 8.0]))
                            .with_response("u2", answer([3.0, 6.0, 7.0]))
                            .with_response("u3", answer([1.0, 4.0, 9.0]))
                            .with_response("synthesis", NARRATIVE)
}

struct Harness {
    orchestrator: StageOrchestrator<InMemoryArtifactStore, InMemoryEventStore>,
    store: Arc<InMemoryArtifactStore>,
    events: Arc<InMemoryEventStore>,
    _exports: TempDir,
}

fn harness(cfg: PipelineConfig, llm: Arc<dyn LlmClient>) -> Harness {
    let exports = TempDir::new().unwrap();
    let store = Arc::new(InMemoryArtifactStore::new());
    let events = Arc::new(InMemoryEventStore::new());
    let orchestrator = StageOrchestrator::new(cfg, store.clone(), events.clone(), llm).unwrap()
                                                                                      .with_export_root(exports.path());
    Harness { orchestrator,
              store,
              events,
              _exports: exports }
}

#[tokio::test]
async fn full_run_completes_with_verified_export() {
    let llm = Arc::new(scripted());
    let h = harness(config(), llm.clone());
    let report = h.orchestrator.run(docs()).await.unwrap();

    assert_eq!(report.status(), RunStatus::Complete);
    assert!(report.flagged().is_empty());
    for stage in Stage::ALL {
        assert_eq!(report.run.slot(stage).unwrap().status, StageStatus::Passed, "{stage}");
    }
    let record = report.export.as_ref().unwrap();
    assert_eq!(record.file(TABLE_FILE).unwrap().rows, Some(3));
    assert_eq!(llm.calls(), 4);

    let dir = report.export_dir.as_ref().unwrap();
    let verified = ExportValidator::new(h.store.as_ref()).verify_export(dir).unwrap();
    assert_eq!(&verified, record);
    assert!(h.orchestrator.verify_run(report.run_id()).unwrap() >= 5);
}

#[tokio::test]
async fn transient_failures_retry_and_exhaustion_rejects_the_unit() {
    let llm = Arc::new(scripted().with_sequence("u1", vec![Err(LlmError::Timeout(50)), Ok(LlmResponse::new(answer([2.0, 5.0, 8.0])))])
                                 .with_sequence("u2", vec![Err(LlmError::RateLimited("429".into()))]));
    let h = harness(config(), llm.clone());
    let report = h.orchestrator.run(docs()).await.unwrap();

    assert_eq!(report.status(), RunStatus::Partial);
    assert_eq!(report.run.retries, 3);
    assert_eq!(report.run.rejected.len(), 1);
    assert_eq!(report.run.rejected[0].unit_id, "u2");
    assert_eq!(report.run.rejected[0].class, ErrorClass::Transient);
    // u1: 2 llamadas, u2: 1 + 2 reintentos, u3: 1, synthesis: 1.
    assert_eq!(llm.calls(), 7);

    let events = h.events.list(report.run_id()).unwrap();
    let diagnostics = events.iter()
                            .find_map(|e| match &e.kind {
                                RunEventKind::UnitRejected { diagnostics, .. } => Some(diagnostics.clone()),
                                _ => None,
                            })
                            .unwrap();
    let l2 = diagnostics.iter().find(|d| d.layer == QaLayer::ResponseValidation).unwrap();
    assert!(l2.is_fail());
    assert_eq!(report.export.unwrap().file(TABLE_FILE).unwrap().rows, Some(2));
}

#[tokio::test]
async fn statistics_failure_degrades_to_partial_export() {
    let mut cfg = config();
    cfg.qa.min_units_for_statistics = 3;
    let llm = Arc::new(scripted().with_response("u3", "I am unable to score this document."));
    let h = harness(cfg, llm);
    let report = h.orchestrator.run(docs()).await.unwrap();

    assert_eq!(report.status(), RunStatus::Partial);
    let slot = |s| report.run.slot(s).unwrap().status;
    assert_eq!(slot(Stage::Statistics), StageStatus::Failed);
    assert_eq!(slot(Stage::Synthesis), StageStatus::Skipped);
    assert_eq!(slot(Stage::Export), StageStatus::Passed);
    let (class, _) = report.run.slot(Stage::Statistics).unwrap().error.clone().unwrap();
    assert_eq!(class, ErrorClass::Quality);
    assert_eq!(report.export.unwrap().file(TABLE_FILE).unwrap().rows, Some(2));
}

#[tokio::test]
async fn rerun_with_same_inputs_reuses_cached_artifacts() {
    let llm = Arc::new(scripted());
    let h = harness(config(), llm.clone());
    let first = h.orchestrator.run(docs()).await.unwrap();
    let calls = llm.calls();
    let second = h.orchestrator.run(docs()).await.unwrap();

    assert_eq!(llm.calls(), calls);
    assert_eq!(second.status(), RunStatus::Complete);
    assert_eq!(first.run.terminal_artifacts(), second.run.terminal_artifacts());
    assert!(second.run.artifacts_of(Stage::Analysis).all(|a| a.cached));
    assert!(second.run.artifacts_of(Stage::Ingest).all(|a| a.cached));
}

/// Cliente que cancela el run en cuanto recibe la primera llamada.
struct CancellingClient {
    inner: ScriptedLlmClient,
    flag: CancellationFlag,
}

#[async_trait]
impl LlmClient for CancellingClient {
    fn get_name(&self) -> &str {
        "cancelling"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.flag.cancel("operator abort");
        self.inner.complete(request).await
    }
}

#[tokio::test]
async fn cancellation_publishes_no_unvalidated_artifact() {
    let flag = CancellationFlag::new();
    let llm = Arc::new(CancellingClient { inner: scripted(),
                                          flag: flag.clone() });
    let h = harness(config(), llm);
    let orchestrator = h.orchestrator.with_cancellation(flag);
    let report = orchestrator.run(docs()).await.unwrap();

    assert_eq!(report.status(), RunStatus::Failed);
    assert_eq!(report.run.cancelled.as_deref(), Some("operator abort"));
    assert!(report.export.is_none());
    let records = h.store.records().unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.stage == Stage::Ingest));
    assert!(records.iter().all(|r| h.store.validate_chain(&r.content_hash)));
    for stage in [Stage::Statistics, Stage::Synthesis, Stage::Export] {
        assert_eq!(report.run.slot(stage).unwrap().status, StageStatus::Skipped);
    }
}

#[tokio::test]
async fn override_and_branch_turn_flagged_unit_into_exported_row() {
    let mut cfg = config();
    cfg.qa.min_score_variance = 1.0;
    // u3 queda borderline en la capa 3 y sin evaluadores se marca para revisión.
    let llm = Arc::new(scripted().with_response("u3", answer([4.0, 4.5, 5.0])));
    let h = harness(cfg, llm.clone());
    let parent = h.orchestrator.run(docs()).await.unwrap();

    assert_eq!(parent.status(), RunStatus::Partial);
    let flagged = parent.flagged();
    assert_eq!(flagged.len(), 1);
    assert_eq!(parent.export.as_ref().unwrap().file(TABLE_FILE).unwrap().rows, Some(2));

    let passing = parent.run
                        .artifacts_of(Stage::Analysis)
                        .find(|a| a.unit_id.as_deref() == Some("u1"))
                        .unwrap()
                        .hash
                        .clone();
    assert!(matches!(h.orchestrator.grant_override(parent.run_id(), &passing, "reviewer", "n/a"),
                     Err(PipelineError::NotFlagged(_))));
    h.orchestrator.grant_override(parent.run_id(), &flagged[0], "reviewer", "checked by hand").unwrap();
    assert!(matches!(h.orchestrator.grant_override(parent.run_id(), &flagged[0], "reviewer", "again"),
                     Err(PipelineError::NotFlagged(_))));

    let calls = llm.calls();
    let branch = h.orchestrator.branch(parent.run_id()).await.unwrap();
    assert_eq!(branch.status(), RunStatus::Complete);
    assert_eq!(branch.run.parent, Some(parent.run_id()));
    assert_eq!(llm.calls(), calls + 1, "only the synthesis is recomputed");
    assert_eq!(branch.export.as_ref().unwrap().file(TABLE_FILE).unwrap().rows, Some(3));

    let parent_now = h.orchestrator.status(parent.run_id()).unwrap();
    assert_eq!(parent_now.branches, vec![branch.run_id()]);
}

fn with_second_reader(mut cfg: PipelineConfig) -> PipelineConfig {
    cfg.qa.min_score_variance = 1.0;
    cfg.evaluators = vec![EvaluatorConfig { name: "second-reader".into(),
                                            llm: None }];
    cfg
}

fn unit_qa(h: &Harness, run: &PipelineRun, unit: &str) -> QaResult {
    let hash = &run.artifacts_of(Stage::Analysis)
                   .find(|a| a.unit_id.as_deref() == Some(unit))
                   .unwrap()
                   .hash;
    h.store.retrieve(hash).unwrap().qa_result
}

#[tokio::test]
async fn borderline_unit_passes_when_configured_evaluator_agrees() {
    let llm = Arc::new(scripted().with_response("u3", answer([4.0, 4.5, 5.0]))
                                 .with_response("second-reader:u3", answer([4.2, 4.5, 4.8])));
    let h = harness(with_second_reader(config()), llm.clone());
    let report = h.orchestrator.run(docs()).await.unwrap();

    assert_eq!(report.status(), RunStatus::Complete);
    assert!(report.flagged().is_empty());
    assert_eq!(report.export.as_ref().unwrap().file(TABLE_FILE).unwrap().rows, Some(3));
    let qa = unit_qa(&h, &report.run, "u3");
    assert_eq!(qa.outcome, QaOutcome::Pass);
    let cross = qa.diagnostics.iter().find(|d| d.layer == QaLayer::CrossValidation).unwrap();
    assert_eq!(cross.verdict, LayerVerdict::Pass);
    // 3 análisis, 1 evaluación de u3 y la síntesis.
    assert_eq!(llm.calls(), 5);
}

#[tokio::test]
async fn evaluator_answer_missing_a_dimension_flags_the_unit() {
    let partial = r#"{"scores":{"claims":4.2,"evidence":4.5},"derived":{"claims":0.5,"evidence":0.5,"reciprocity":0.0}}"#;
    let llm = Arc::new(scripted().with_response("u3", answer([4.0, 4.5, 5.0]))
                                 .with_response("second-reader:u3", partial));
    let h = harness(with_second_reader(config()), llm);
    let report = h.orchestrator.run(docs()).await.unwrap();

    assert_eq!(report.status(), RunStatus::Partial);
    assert_eq!(report.flagged().len(), 1);
    assert_eq!(report.export.as_ref().unwrap().file(TABLE_FILE).unwrap().rows, Some(2));
    let qa = unit_qa(&h, &report.run, "u3");
    assert_eq!(qa.outcome, QaOutcome::FlaggedForReview);
    let cross = qa.diagnostics.iter().find(|d| d.layer == QaLayer::CrossValidation).unwrap();
    assert_eq!(cross.verdict, LayerVerdict::Flag);
    assert!(cross.detail.contains("second-reader"), "{}", cross.detail);
}

#[tokio::test]
async fn synthesis_may_cite_accepted_analyses_but_not_flagged_ones() {
    let flagged_cfg = || {
        let mut cfg = config();
        cfg.qa.min_score_variance = 1.0;
        cfg
    };
    let first = harness(flagged_cfg(), Arc::new(scripted().with_response("u3", answer([4.0, 4.5, 5.0]))));
    let baseline = first.orchestrator.run(docs()).await.unwrap();
    let flagged = baseline.flagged()[0].clone();
    let accepted = baseline.run
                           .accepted(Stage::Analysis)
                           .first()
                           .unwrap()
                           .hash
                           .clone();

    let citing = |narrative: String| {
        harness(flagged_cfg(),
                Arc::new(scripted().with_response("u3", answer([4.0, 4.5, 5.0]))
                                   .with_response("synthesis", narrative)))
    };

    let ok = citing(format!("Claims lead; see {accepted}."));
    let report = ok.orchestrator.run(docs()).await.unwrap();
    assert_eq!(report.run.slot(Stage::Synthesis).unwrap().status, StageStatus::Passed);

    let bad = citing(format!("Claims lead; see {accepted} and {flagged}."));
    let report = bad.orchestrator.run(docs()).await.unwrap();
    let slot = report.run.slot(Stage::Synthesis).unwrap();
    assert_eq!(slot.status, StageStatus::Failed);
    let (class, detail) = slot.error.clone().unwrap();
    assert_eq!(class, ErrorClass::Quality);
    assert!(detail.contains(&flagged), "{detail}");
    assert_eq!(report.run.artifacts_of(Stage::Synthesis).count(), 0);
}

#[tokio::test]
async fn empty_or_duplicate_corpus_is_refused() {
    let h = harness(config(), Arc::new(scripted()));
    assert!(matches!(h.orchestrator.run(Vec::new()).await, Err(PipelineError::InputsNotReady { .. })));
    assert!(matches!(h.orchestrator.run(vec![doc("u1"), doc("u1")]).await,
                     Err(PipelineError::InputsNotReady { .. })));
    assert!(h.store.is_empty());
}
