use std::sync::Mutex;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{ArtifactStore, InsertOutcome};
use crate::errors::StoreError;
use crate::model::{Artifact, MetadataRecord};

/// Backend en memoria, seguro para escritores concurrentes.
///
/// - `objects`: hash -> artifact (insert-if-absent vía entry API).
/// - `records`: log append-only de metadatos.
/// - `by_fingerprint`: índice de caché de etapas.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    objects: DashMap<String, Artifact>,
    records: Mutex<Vec<MetadataRecord>>,
    by_fingerprint: DashMap<String, String>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Sobrescribe un objeto sin verificar nada. Simula corrupción fuera de
    /// banda; el contrato del store nunca lo usa.
    pub fn overwrite_unchecked(&self, artifact: Artifact) {
        self.objects.insert(artifact.content_hash.clone(), artifact);
    }

    /// Elimina un objeto sin tocar el log (simula pérdida de un ancestro).
    pub fn remove_unchecked(&self, hash: &str) -> Option<Artifact> {
        self.objects.remove(hash).map(|(_, a)| a)
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn load_raw(&self, hash: &str) -> Result<Option<Artifact>, StoreError> {
        Ok(self.objects.get(hash).map(|a| a.value().clone()))
    }

    fn insert_if_absent(&self, artifact: &Artifact) -> Result<InsertOutcome, StoreError> {
        match self.objects.entry(artifact.content_hash.clone()) {
            Entry::Occupied(existing) => Ok(InsertOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(artifact.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    fn append_record(&self, artifact: &Artifact) -> Result<MetadataRecord, StoreError> {
        let mut records = self.records
                              .lock()
                              .map_err(|_| StoreError::Backend("metadata log lock poisoned".into()))?;
        let record = artifact.metadata_record(records.len() as u64);
        records.push(record.clone());
        if let Some(fp) = &artifact.input_fingerprint {
            self.by_fingerprint.insert(fp.clone(), artifact.content_hash.clone());
        }
        Ok(record)
    }

    fn records(&self) -> Result<Vec<MetadataRecord>, StoreError> {
        let records = self.records
                          .lock()
                          .map_err(|_| StoreError::Backend("metadata log lock poisoned".into()))?;
        Ok(records.clone())
    }

    fn find_by_input_fingerprint(&self, fingerprint: &str) -> Result<Option<Artifact>, StoreError> {
        let hash = self.by_fingerprint.get(fingerprint).map(|h| h.value().clone());
        match hash {
            Some(h) => self.retrieve(&h).map(Some),
            None => Ok(None),
        }
    }
}
