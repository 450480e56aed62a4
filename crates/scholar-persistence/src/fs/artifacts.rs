use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info};
use scholar_core::{Artifact, ArtifactStore, InsertOutcome, MetadataRecord, StoreError};
use tempfile::NamedTempFile;

use super::{append_jsonl, read_jsonl, with_retry};
use crate::config::StoreConfig;
use crate::error::PersistenceError;

const OBJECTS_DIR: &str = "objects";
const RECORDS_FILE: &str = "records.jsonl";

/// Estado del log protegido por un único lock: siguiente `seq` e índice de
/// fingerprints (reconstruido del log al abrir).
#[derive(Debug, Default)]
struct LogState {
    next_seq: u64,
    by_fingerprint: HashMap<String, String>,
}

/// `ArtifactStore` sobre el sistema de ficheros.
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    io_retries: u32,
    log: Mutex<LogState>,
}

fn is_hex_hash(hash: &str) -> bool {
    hash.len() >= 2 && hash.bytes().all(|b| b.is_ascii_hexdigit())
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("metadata log lock poisoned".into())
}

impl FsArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        Self::open_with(&StoreConfig::default().with_root(root))
    }

    pub fn open_with(cfg: &StoreConfig) -> Result<Self, PersistenceError> {
        let root = cfg.root.clone();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        let records: Vec<MetadataRecord> = read_jsonl(&root.join(RECORDS_FILE))?;
        let mut state = LogState { next_seq: records.last().map(|r| r.seq + 1).unwrap_or(0),
                                   by_fingerprint: HashMap::new() };
        for r in &records {
            if let Some(fp) = &r.input_fingerprint {
                state.by_fingerprint.insert(fp.clone(), r.content_hash.clone());
            }
        }
        info!("artifact store opened at {} ({} records)", root.display(), records.len());
        Ok(Self { root,
                  io_retries: cfg.io_retries,
                  log: Mutex::new(state) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ruta del objeto para `hash` (`objects/ab/abcd....json`).
    pub fn object_path(&self, hash: &str) -> PathBuf {
        let shard = hash.get(..2).unwrap_or("__");
        self.root.join(OBJECTS_DIR).join(shard).join(format!("{hash}.json"))
    }

    fn read_object(&self, path: &Path) -> Result<Option<Artifact>, PersistenceError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map(Some)
                                      .map_err(|e| PersistenceError::Corrupt { path: path.display().to_string(),
                                                                               detail: e.to_string() })
    }

    /// Escribe en un temporal del mismo directorio y lo publica sin
    /// sobrescribir. `Ok(false)` si otro escritor publicó antes.
    fn publish_object(&self, artifact: &Artifact) -> Result<bool, PersistenceError> {
        let path = self.object_path(&artifact.content_hash);
        let shard = path.parent().ok_or_else(|| PersistenceError::Io("object path without parent".into()))?;
        fs::create_dir_all(shard)?;
        let mut tmp = NamedTempFile::new_in(shard)?;
        tmp.write_all(&serde_json::to_vec_pretty(artifact)?)?;
        tmp.as_file().sync_all()?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error.into()),
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn load_raw(&self, hash: &str) -> Result<Option<Artifact>, StoreError> {
        if !is_hex_hash(hash) {
            return Ok(None);
        }
        let path = self.object_path(hash);
        match with_retry(self.io_retries, || self.read_object(&path)) {
            // Objeto ilegible bajo su clave: corrupción.
            Err(PersistenceError::Corrupt { detail, .. }) => Err(StoreError::Integrity { key: hash.to_string(),
                                                                                          actual: format!("unreadable object ({detail})") }),
            other => Ok(other?),
        }
    }

    fn insert_if_absent(&self, artifact: &Artifact) -> Result<InsertOutcome, StoreError> {
        if with_retry(self.io_retries, || self.publish_object(artifact))? {
            return Ok(InsertOutcome::Inserted);
        }
        debug!("fs store: {} already published", artifact.content_hash);
        match self.load_raw(&artifact.content_hash)? {
            Some(existing) => Ok(InsertOutcome::Existing(existing)),
            None => Err(StoreError::Backend(format!("object {} vanished after publish race", artifact.content_hash))),
        }
    }

    fn append_record(&self, artifact: &Artifact) -> Result<MetadataRecord, StoreError> {
        let mut state = self.log.lock().map_err(poisoned)?;
        let record = artifact.metadata_record(state.next_seq);
        let path = self.root.join(RECORDS_FILE);
        with_retry(self.io_retries, || append_jsonl(&path, &record))?;
        state.next_seq += 1;
        if let Some(fp) = &artifact.input_fingerprint {
            state.by_fingerprint.insert(fp.clone(), artifact.content_hash.clone());
        }
        Ok(record)
    }

    fn records(&self) -> Result<Vec<MetadataRecord>, StoreError> {
        let _guard = self.log.lock().map_err(poisoned)?;
        let path = self.root.join(RECORDS_FILE);
        Ok(with_retry(self.io_retries, || read_jsonl(&path))?)
    }

    fn find_by_input_fingerprint(&self, fingerprint: &str) -> Result<Option<Artifact>, StoreError> {
        let hash = {
            let state = self.log.lock().map_err(poisoned)?;
            state.by_fingerprint.get(fingerprint).cloned()
        };
        match hash {
            Some(h) => self.retrieve(&h).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholar_core::{ArtifactDraft, QaResult, Stage};
    use serde_json::json;

    #[test]
    fn object_layout_is_sharded_by_hash_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();
        let art = store.store(ArtifactDraft::new(Stage::Ingest, json!({"t": "x"}), "v1", QaResult::deterministic("ok")))
                       .unwrap();
        let path = store.object_path(&art.content_hash);
        assert!(path.exists());
        assert!(path.parent().unwrap().ends_with(&art.content_hash[..2]));
        assert_eq!(store.load_raw("../../etc").unwrap(), None);
    }
}
