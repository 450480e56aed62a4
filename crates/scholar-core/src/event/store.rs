use std::sync::Mutex;

use chrono::Utc;
use indexmap::IndexMap;
use uuid::Uuid;

use super::{RunEvent, RunEventKind};
use crate::errors::StoreError;

/// Almacenamiento de eventos append-only.
pub trait EventStore: Send + Sync {
    /// Agrega un evento a partir de su kind y devuelve el evento completo (con
    /// seq y ts).
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, StoreError>;
    /// Eventos de un run en orden ascendente de seq.
    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, StoreError>;
    /// Runs conocidos, en orden de creación.
    fn run_ids(&self) -> Result<Vec<Uuid>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: Mutex<IndexMap<Uuid, Vec<RunEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("event log lock poisoned".into())
}

impl EventStore for InMemoryEventStore {
    fn append_kind(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, StoreError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        let events = inner.entry(run_id).or_default();
        let ev = RunEvent { seq: events.len() as u64,
                            run_id,
                            kind,
                            ts: Utc::now() };
        events.push(ev.clone());
        Ok(ev)
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, StoreError> {
        let inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.get(&run_id).cloned().unwrap_or_default())
    }

    fn run_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_per_run_and_ordered() {
        let store = InMemoryEventStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.append_kind(a, RunEventKind::RunCancelled { reason: "x".into() }).unwrap();
        store.append_kind(b, RunEventKind::RunCancelled { reason: "y".into() }).unwrap();
        let ev = store.append_kind(a, RunEventKind::RunCancelled { reason: "z".into() }).unwrap();
        assert_eq!(ev.seq, 1);
        assert_eq!(store.list(a).unwrap().len(), 2);
        assert_eq!(store.run_ids().unwrap(), vec![a, b]);
        assert!(store.list(Uuid::new_v4()).unwrap().is_empty());
    }
}
