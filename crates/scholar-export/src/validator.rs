//! ExportValidator: consumidor terminal del pipeline.
//!
//! Orden de `export`:
//! 1. `verify_chain` de cada artifact terminal (en paralelo con rayon).
//! 2. Decodificación y construcción de filas, reporte y manifiesto en memoria.
//! 3. Rechazo de una tabla vacía si el run está `complete`.
//! 4. Escritura en un directorio temporal hermano del destino, relectura y
//!    comprobación de hashes, y sólo entonces un `rename` del directorio
//!    completo a su lugar final (ver `replace_dir`).
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{info, warn};
use rayon::prelude::*;
use scholar_core::hashing::content_hash_bytes;
use scholar_core::{Artifact, ArtifactStore, FrameworkSpec, PayloadSpec, PipelineRun, RunStatus, Stage, StatisticsPayload,
                   StoreError, SynthesisPayload};
use uuid::Uuid;

use crate::errors::{ExportError, IntegrityReason};
use crate::record::{ExportRecord, ExportedFile, MANIFEST_FILE, REPORT_FILE, TABLE_FILE};
use crate::report::{self, ReportInput};
use crate::table::{self, TableRow};

pub struct ExportValidator<'a> {
    store: &'a dyn ArtifactStore,
}

fn broken(hash: &str, source: StoreError) -> ExportError {
    ExportError::integrity(IntegrityReason::BrokenChain { hash: hash.to_string(),
                                                          source })
}

fn decode<T: PayloadSpec>(artifact: &Artifact) -> Result<T, ExportError> {
    T::from_payload(&artifact.payload).map_err(|e| {
                                         ExportError::integrity(IntegrityReason::Undecodable { hash: artifact.content_hash
                                                                                                             .clone(),
                                                                                               detail: e.to_string() })
                                     })
}

impl<'a> ExportValidator<'a> {
    pub fn new(store: &'a dyn ArtifactStore) -> Self {
        Self { store }
    }

    /// Verifica en paralelo la cadena de cada hash; devuelve el primer error
    /// en el orden de entrada.
    pub fn verify_chains(&self, hashes: &[String]) -> Result<(), ExportError> {
        let results: Vec<(usize, Result<usize, StoreError>)> =
            hashes.par_iter().enumerate().map(|(i, h)| (i, self.store.verify_chain(h))).collect();
        for (i, res) in results {
            if let Err(e) = res {
                return Err(broken(&hashes[i], e));
            }
        }
        Ok(())
    }

    /// Exporta el run a `out_dir`. No escribe nada si alguna verificación
    /// falla.
    pub fn export(&self, run: &PipelineRun, framework: &FrameworkSpec, out_dir: &Path) -> Result<ExportRecord, ExportError> {
        let upstream = run.terminal_artifacts();
        self.verify_chains(&upstream)?;

        let mut rows = Vec::new();
        let mut statistics: Option<(String, StatisticsPayload)> = None;
        let mut synthesis: Option<(String, SynthesisPayload)> = None;
        for hash in &upstream {
            let artifact = self.store.retrieve(hash).map_err(|e| broken(hash, e))?;
            match artifact.stage {
                Stage::Analysis => rows.push(TableRow::from_artifact(&artifact, &framework.dimensions)?),
                Stage::Statistics => statistics = Some((hash.clone(), decode(&artifact)?)),
                Stage::Synthesis => synthesis = Some((hash.clone(), decode(&artifact)?)),
                Stage::Ingest | Stage::Export => {}
            }
        }
        rows.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));

        let status = run.effective_status();
        if rows.is_empty() && status == RunStatus::Complete {
            return Err(ExportError::integrity(IntegrityReason::EmptyExport { status }));
        }
        if rows.is_empty() {
            warn!("export: run {} ({status}) has no accepted analysis rows", run.id);
        }

        let flagged = run.flagged_hashes();
        let csv_bytes = table::render_csv(&rows, &framework.dimensions)?;
        let report_text = report::render(&ReportInput { run,
                                                        framework: &framework.name,
                                                        rows: &rows,
                                                        statistics: statistics.as_ref().map(|(h, s)| (h.as_str(), s)),
                                                        synthesis: synthesis.as_ref().map(|(h, s)| (h.as_str(), s)),
                                                        upstream: &upstream,
                                                        flagged: &flagged })?;
        let record = ExportRecord { run_id: run.id,
                                    status,
                                    framework: framework.name.clone(),
                                    files: vec![ExportedFile::new(TABLE_FILE, &csv_bytes, Some(rows.len())),
                                                ExportedFile::new(REPORT_FILE, report_text.as_bytes(), None)],
                                    upstream,
                                    flagged,
                                    record_hash: String::new() }.seal();
        let manifest = serde_json::to_vec_pretty(&record)?;

        self.publish(out_dir,
                     &[(TABLE_FILE, csv_bytes.as_slice()), (REPORT_FILE, report_text.as_bytes()), (MANIFEST_FILE, manifest.as_slice())],
                     &record)?;
        info!("export: run {} -> {} ({} rows, status {status})", run.id, out_dir.display(), rows.len());
        Ok(record)
    }

    fn publish(&self, out_dir: &Path, files: &[(&str, &[u8])], record: &ExportRecord) -> Result<(), ExportError> {
        let parent = match out_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new().prefix(".export-").tempdir_in(parent)?;
        for (name, bytes) in files {
            fs::write(staging.path().join(name), bytes)?;
        }
        for f in &record.files {
            let on_disk = fs::read(staging.path().join(&f.name))?;
            let actual = content_hash_bytes(&on_disk);
            if actual != f.sha256 {
                return Err(ExportError::integrity(IntegrityReason::FileHashMismatch { file: f.name.clone(),
                                                                                      expected: f.sha256.clone(),
                                                                                      actual }));
            }
        }
        replace_dir(staging.path(), out_dir, |from, to| fs::rename(from, to))?;
        Ok(())
    }

    /// Re-verifica un export ya escrito: hashes de ficheros, self-hash del
    /// manifiesto, cadenas upstream y que cada fila resuelva a un artifact.
    pub fn verify_export(&self, dir: &Path) -> Result<ExportRecord, ExportError> {
        let manifest = fs::read(dir.join(MANIFEST_FILE))?;
        let record: ExportRecord = serde_json::from_slice(&manifest)?;
        if !record.is_sealed() {
            return Err(ExportError::integrity(IntegrityReason::RecordHashMismatch));
        }
        for f in &record.files {
            let bytes = fs::read(dir.join(&f.name))?;
            let actual = content_hash_bytes(&bytes);
            if actual != f.sha256 {
                return Err(ExportError::integrity(IntegrityReason::FileHashMismatch { file: f.name.clone(),
                                                                                      expected: f.sha256.clone(),
                                                                                      actual }));
            }
        }
        self.verify_chains(&record.upstream)?;

        let table_bytes = fs::read(dir.join(TABLE_FILE))?;
        let rows = table::read_provenance(&table_bytes)?;
        if let Some(expected) = record.file(TABLE_FILE).and_then(|f| f.rows) {
            if expected != rows.len() {
                return Err(ExportError::integrity(IntegrityReason::RowCountMismatch { file: TABLE_FILE.into(),
                                                                                      expected,
                                                                                      actual: rows.len() }));
            }
        }
        let upstream: HashSet<&String> = record.upstream.iter().collect();
        for (artifact_hash, source_hash) in &rows {
            if !upstream.contains(artifact_hash) {
                return Err(ExportError::integrity(IntegrityReason::UnknownRow { hash: artifact_hash.clone() }));
            }
            let artifact = self.store.retrieve(artifact_hash).map_err(|e| broken(artifact_hash, e))?;
            if artifact.dependency_hashes.first() != Some(source_hash) {
                return Err(ExportError::integrity(IntegrityReason::MissingField { hash: artifact_hash.clone(),
                                                                                  field: "source_hash".into() }));
            }
        }
        Ok(record)
    }
}

/// Coloca el directorio `staging` en `target` con renombrados de directorio
/// completo. Un `target` previo se aparta a un hermano y se restaura si el
/// segundo rename falla: los lectores ven el export anterior o el nuevo,
/// nunca una mezcla.
fn replace_dir<R>(staging: &Path, target: &Path, mut rename: R) -> std::io::Result<()>
    where R: FnMut(&Path, &Path) -> std::io::Result<()>
{
    if !target.exists() {
        return rename(staging, target);
    }
    let parent = staging.parent().unwrap_or_else(|| Path::new("."));
    let previous = parent.join(format!(".export-previous-{}", Uuid::new_v4()));
    rename(target, &previous)?;
    if let Err(e) = rename(staging, target) {
        if let Err(restore) = fs::rename(&previous, target) {
            warn!("export: could not restore {} from {}: {restore}", target.display(), previous.display());
        }
        return Err(e);
    }
    if let Err(e) = fs::remove_dir_all(&previous) {
        warn!("export: stale previous export left at {}: {e}", previous.display());
    }
    Ok(())
}
