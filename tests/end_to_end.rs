use std::fs;
use std::sync::Arc;

use scholarflow::scholar_core::{FrameworkSpec, RunEventKind};
use scholarflow::scholar_export::table::read_provenance;
use scholarflow::scholar_export::TABLE_FILE;
use scholarflow::scholar_pipeline::ScriptedLlmClient;
use scholarflow::{open_stores, ArtifactStore, EventStore, IngestPayload, PipelineConfig, PipelineError, RunStatus, Stage,
                  StageOrchestrator, StoreConfig};
use uuid::Uuid;

fn framework() -> FrameworkSpec {
    FrameworkSpec { name: "stance".into(),
                    version: "3".into(),
                    dimensions: vec!["support".into(), "opposition".into()],
                    score_min: 0.0,
                    score_max: 1.0,
                    default_score: 0.5 }
}

fn config() -> PipelineConfig {
    let mut cfg = PipelineConfig::new("e2e", framework(), 0.1);
    cfg.retry.base_delay_ms = 1;
    cfg.retry.max_delay_ms = 2;
    cfg
}

fn doc(id: &str) -> IngestPayload {
    IngestPayload { unit_id: id.into(),
                    title: None,
                    text: format!("Op-ed {id} on the proposed transit levy and its critics.") }
}

fn answer(support: f64, opposition: f64) -> String {
    let total = support + opposition;
    format!("```json\n{{\"scores\": {{\"support\": {support}, \"opposition\": {opposition}}}, \
             \"derived\": {{\"support\": {}, \"opposition\": {}}}}}\n```",
            support / total,
            opposition / total)
}

const NARRATIVE: &str = "Support outweighs opposition across the corpus.";

#[tokio::test]
async fn two_documents_export_two_rows_with_resolvable_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let store_cfg = StoreConfig::default().with_root(dir.path().join("store"));
    let (store, events) = open_stores(&store_cfg).unwrap();
    let llm = Arc::new(ScriptedLlmClient::new().with_response("d1", answer(0.9, 0.1))
                                               .with_response("d2", answer(0.1, 0.8))
                                               .with_response("synthesis", NARRATIVE));
    let orchestrator = StageOrchestrator::new(config(), store.clone(), events.clone(), llm).unwrap()
                                                                                          .with_export_root(dir.path().join("exports"));
    let report = orchestrator.run(vec![doc("d1"), doc("d2")]).await.unwrap();
    assert_eq!(report.status(), RunStatus::Complete);

    let export_dir = report.export_dir.clone().unwrap();
    let csv = fs::read(export_dir.join(TABLE_FILE)).unwrap();
    let rows = read_provenance(&csv).unwrap();
    assert_eq!(rows.len(), 2);
    for (artifact_hash, source_hash) in rows {
        let artifact = store.retrieve(&artifact_hash).unwrap();
        assert_eq!(artifact.stage, Stage::Analysis);
        assert_eq!(artifact.dependency_hashes, vec![source_hash.clone()]);
        assert_eq!(store.retrieve(&source_hash).unwrap().stage, Stage::Ingest);
    }

    // El estado se reconstruye igual desde disco en un proceso nuevo.
    let (store2, events2) = open_stores(&store_cfg).unwrap();
    let reopened = StageOrchestrator::new(config(), store2, events2, Arc::new(ScriptedLlmClient::new())).unwrap();
    assert_eq!(reopened.status(report.run_id()).unwrap(), report.run);
    assert!(reopened.verify_run(report.run_id()).unwrap() > 0);
}

#[tokio::test]
async fn one_bad_unit_out_of_four_yields_partial_run() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(ScriptedLlmClient::new().with_response("d1", answer(0.9, 0.1))
                                               .with_response("d2", answer(0.1, 0.8))
                                               .with_response("d3", answer(0.8, 0.2))
                                               .with_response("d4", "{\"scores\": {\"support\": 0.4")
                                               .with_response("synthesis", NARRATIVE));
    let orchestrator = scholarflow::in_memory(config(), llm).unwrap().with_export_root(dir.path());
    let report = orchestrator.run(vec![doc("d1"), doc("d2"), doc("d3"), doc("d4")]).await.unwrap();

    assert_eq!(report.status(), RunStatus::Partial);
    assert_eq!(report.run.rejected.len(), 1);
    assert_eq!(report.run.rejected[0].unit_id, "d4");
    let record = report.export.unwrap();
    assert_eq!(record.file(TABLE_FILE).unwrap().rows, Some(3));
    assert_eq!(record.status, RunStatus::Partial);
}

#[tokio::test]
async fn complete_run_without_rows_is_never_exported() {
    let dir = tempfile::tempdir().unwrap();
    let (store, events) = open_stores(&StoreConfig::default().with_root(dir.path().join("store"))).unwrap();
    let run_id = Uuid::new_v4();
    events.append_kind(run_id,
                       RunEventKind::RunInitialized { config_hash: "manual".into(),
                                                      stages: vec![Stage::Ingest, Stage::Analysis, Stage::Export],
                                                      unit_count: 0,
                                                      parent: None })
          .unwrap();
    events.append_kind(run_id, RunEventKind::RunClosed { status: RunStatus::Complete }).unwrap();

    let orchestrator = StageOrchestrator::new(config(), store, events, Arc::new(ScriptedLlmClient::new())).unwrap();
    let out = dir.path().join("out");
    match orchestrator.export_run(run_id, &out) {
        Err(PipelineError::Export(e)) => assert!(e.is_integrity()),
        other => panic!("expected export integrity error, got {other:?}"),
    }
    assert!(!out.exists());
}
