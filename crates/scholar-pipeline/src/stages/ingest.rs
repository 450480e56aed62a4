use log::info;
use scholar_core::hashing::hash_value;
use scholar_core::{ArtifactDraft, ArtifactStore, EventStore, IngestPayload, PayloadSpec, QaResult, RunEventKind, Stage};
use uuid::Uuid;

use super::{ensure_not_cancelled, undecodable};
use crate::errors::PipelineError;
use crate::orchestrator::StageOrchestrator;

impl<S, E> StageOrchestrator<S, E>
    where S: ArtifactStore + 'static,
          E: EventStore + 'static
{
    /// Normaliza y persiste cada documento como artifact de ingest.
    pub(crate) fn run_ingest(&self, run_id: Uuid, documents: &[IngestPayload]) -> Result<bool, PipelineError> {
        let producer_version = self.config.producer_version(Stage::Ingest);
        let mut payloads = Vec::with_capacity(documents.len());
        for doc in documents {
            doc.validate()
               .map_err(|detail| PipelineError::InputsNotReady { stage: Stage::Ingest,
                                                                 detail: format!("{}: {detail}", doc.unit_id) })?;
            let payload = doc.into_payload(&producer_version)
                             .map_err(|e| undecodable(&doc.unit_id, e))?;
            payloads.push((doc.unit_id.clone(), payload));
        }
        let hashes: Vec<String> = payloads.iter().map(|(_, p)| hash_value(p)).collect();
        let fingerprint = self.config.stage_fingerprint(Stage::Ingest, &hashes);
        self.emit(run_id,
                  RunEventKind::StageStarted { stage: Stage::Ingest,
                                               fingerprint: fingerprint.clone() })?;

        let mut outputs = Vec::with_capacity(payloads.len());
        for ((unit_id, payload), hash) in payloads.into_iter().zip(hashes) {
            ensure_not_cancelled(&self.cancel)?;
            let cached = self.store.contains(&hash)?;
            let draft = ArtifactDraft::new(Stage::Ingest,
                                           payload,
                                           producer_version.clone(),
                                           QaResult::deterministic("document normalized"));
            let artifact = self.store.store(draft)?;
            self.emit(run_id,
                      RunEventKind::ArtifactRecorded { stage: Stage::Ingest,
                                                       content_hash: artifact.content_hash.clone(),
                                                       unit_id: Some(unit_id),
                                                       qa_outcome: artifact.qa_outcome(),
                                                       cached })?;
            outputs.push(artifact.content_hash);
        }
        info!("run {run_id}: ingested {} documents", outputs.len());
        self.emit(run_id,
                  RunEventKind::StageFinished { stage: Stage::Ingest,
                                                outputs,
                                                fingerprint })?;
        Ok(true)
    }
}
