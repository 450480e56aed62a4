use log::info;
use scholar_core::{ArtifactDraft, ArtifactStore, EventStore, PayloadSpec, QaResult, RunEventKind, Stage};
use scholar_export::{ExportRecord, ExportValidator};
use uuid::Uuid;

use super::{ensure_not_cancelled, undecodable};
use crate::errors::PipelineError;
use crate::orchestrator::StageOrchestrator;

impl<S, E> StageOrchestrator<S, E>
    where S: ArtifactStore + 'static,
          E: EventStore + 'static
{
    /// Exporta lo que el run haya completado y registra el manifiesto como
    /// artifact de la etapa `export`.
    pub(crate) fn run_export(&self, run_id: Uuid) -> Result<ExportRecord, PipelineError> {
        let run = self.status(run_id)?;
        let fingerprint = self.config.stage_fingerprint(Stage::Export, &run.terminal_artifacts());
        self.emit(run_id,
                  RunEventKind::StageStarted { stage: Stage::Export,
                                               fingerprint: fingerprint.clone() })?;
        ensure_not_cancelled(&self.cancel)?;

        let dir = self.export_dir_for(run_id);
        let record = ExportValidator::new(self.store.as_ref()).export(&run, &self.config.framework, &dir)?;

        let dependencies = if record.upstream.is_empty() {
            run.artifacts_of(Stage::Ingest).map(|a| a.hash.clone()).collect()
        } else {
            record.upstream.clone()
        };
        let producer_version = self.config.producer_version(Stage::Export);
        let payload = record.into_payload(&producer_version)
                            .map_err(|e| undecodable("export manifest", e))?;
        let draft = ArtifactDraft::new(Stage::Export,
                                       payload,
                                       producer_version,
                                       QaResult::deterministic("export manifest sealed"))
            .with_dependencies(dependencies)
            .with_input_fingerprint(fingerprint.clone());
        let artifact = self.store.store(draft)?;
        info!("run {run_id}: export manifest {} written to {}", artifact.content_hash, dir.display());
        self.finish_single(run_id, Stage::Export, artifact.content_hash.clone(), artifact.qa_outcome(), false, fingerprint)?;
        Ok(record)
    }
}
