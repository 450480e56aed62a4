use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use log::debug;
use scholar_core::{EventStore, RunEvent, RunEventKind, StoreError};
use uuid::Uuid;

use super::{append_jsonl, read_jsonl, with_retry};
use crate::config::StoreConfig;
use crate::error::PersistenceError;

const EVENTS_DIR: &str = "events";
const RUNS_INDEX: &str = "runs.log";

/// `EventStore` append-only en ficheros JSONL, uno por run.
///
/// Responsabilidades:
/// - `append_kind`: asignar `seq` (por run) y persistir el evento completo.
/// - `list`: devolver los eventos de un run en orden de `seq` (replay
///   determinista).
#[derive(Debug)]
pub struct FsEventStore {
    dir: PathBuf,
    io_retries: u32,
    // Siguiente seq por run ya visto en este proceso.
    next_seq: Mutex<HashMap<Uuid, u64>>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("event log lock poisoned".into())
}

impl FsEventStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        Self::open_with(&StoreConfig::default().with_root(root))
    }

    pub fn open_with(cfg: &StoreConfig) -> Result<Self, PersistenceError> {
        let dir = cfg.root.join(EVENTS_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir,
                  io_retries: cfg.io_retries,
                  next_seq: Mutex::new(HashMap::new()) })
    }

    fn run_file(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.jsonl"))
    }

    fn read_run(&self, path: &Path) -> Result<Vec<RunEvent>, PersistenceError> {
        with_retry(self.io_retries, || read_jsonl(path))
    }
}

impl EventStore for FsEventStore {
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, StoreError> {
        let mut next = self.next_seq.lock().map_err(poisoned)?;
        let path = self.run_file(run_id);
        let seq = match next.get(&run_id) {
            Some(seq) => *seq,
            None => {
                let existing = self.read_run(&path)?;
                if existing.is_empty() {
                    let index = self.dir.join(RUNS_INDEX);
                    with_retry(self.io_retries, || append_jsonl(&index, &run_id))?;
                }
                existing.last().map(|e| e.seq + 1).unwrap_or(0)
            }
        };
        let ev = RunEvent { seq,
                            run_id,
                            kind,
                            ts: Utc::now() };
        with_retry(self.io_retries, || append_jsonl(&path, &ev))?;
        next.insert(run_id, seq + 1);
        debug!("event {run_id}#{seq} appended");
        Ok(ev)
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, StoreError> {
        let _guard = self.next_seq.lock().map_err(poisoned)?;
        Ok(self.read_run(&self.run_file(run_id))?)
    }

    fn run_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let _guard = self.next_seq.lock().map_err(poisoned)?;
        let index = self.dir.join(RUNS_INDEX);
        Ok(with_retry(self.io_retries, || read_jsonl(&index))?)
    }
}
