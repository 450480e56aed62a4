//! Almacenamiento direccionado por contenido.
//!
//! El trait `ArtifactStore` separa dos niveles:
//! - Primitivas de backend (`load_raw`, `insert_if_absent`, `append_record`,
//!   `records`): sin semántica, implementadas por cada backend.
//! - Contrato (`store`, `retrieve`, `dependencies_of`, `verify_chain`,
//!   `validate_chain`): métodos provistos, idénticos para todos los backends.
//!
//! Invariantes:
//! - El hash es función pura del payload canónico.
//! - Un objeto se publica con insert-if-absent: escrituras concurrentes del
//!   mismo contenido son una carrera benigna.
//! - Sólo la escritura que publica el objeto agrega un registro al log.
use std::collections::VecDeque;

use chrono::Utc;
use indexmap::IndexMap;
use log::debug;

use crate::errors::StoreError;
use crate::hashing::{hash_value, to_canonical_json};
use crate::model::{Artifact, ArtifactDraft, MetadataRecord, Stage};

mod memory;

pub use memory::InMemoryArtifactStore;

/// Resultado de publicar un objeto.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted,
    /// Ya existía un objeto bajo ese hash (se devuelve tal cual está
    /// persistido).
    Existing(Artifact),
}

pub trait ArtifactStore: Send + Sync {
    /// Lee el artifact persistido bajo `hash` sin verificarlo.
    fn load_raw(&self, hash: &str) -> Result<Option<Artifact>, StoreError>;

    /// Publica el artifact si no existe otro bajo el mismo hash. Debe ser
    /// atómico respecto a otros escritores.
    fn insert_if_absent(&self, artifact: &Artifact) -> Result<InsertOutcome, StoreError>;

    /// Agrega el registro de metadatos del artifact al log append-only y lo
    /// devuelve con su `seq`.
    fn append_record(&self, artifact: &Artifact) -> Result<MetadataRecord, StoreError>;

    /// Log completo de metadatos (orden ascendente por `seq`).
    fn records(&self) -> Result<Vec<MetadataRecord>, StoreError>;

    fn contains(&self, hash: &str) -> Result<bool, StoreError> {
        Ok(self.load_raw(hash)?.is_some())
    }

    /// Persiste un draft y devuelve el artifact.
    ///
    /// Errores:
    /// - `InvalidDependencies`: ingest con dependencias, otra etapa sin ellas,
    ///   o hashes repetidos.
    /// - `BrokenChain`: una dependencia declarada no existe.
    /// - `DuplicateContent`: mismo hash con metadatos materialmente distintos.
    /// - `Integrity`: mismo hash con payload distinto (colisión/corrupción).
    fn store(&self, draft: ArtifactDraft) -> Result<Artifact, StoreError> {
        check_dependency_shape(&draft)?;
        for dep in &draft.dependency_hashes {
            if !self.contains(dep)? {
                return Err(StoreError::BrokenChain { missing: dep.clone(),
                                                     referenced_by: format!("new {} artifact", draft.stage) });
            }
        }
        let hash = hash_value(&draft.payload);
        let candidate = draft.into_artifact(hash, Utc::now());
        if let Some(existing) = self.load_raw(&candidate.content_hash)? {
            return reconcile(existing, &candidate);
        }
        match self.insert_if_absent(&candidate)? {
            InsertOutcome::Inserted => {
                let record = self.append_record(&candidate)?;
                debug!("store: new {} artifact {} (seq={})", candidate.stage, candidate.content_hash, record.seq);
                Ok(candidate)
            }
            InsertOutcome::Existing(existing) => reconcile(existing, &candidate),
        }
    }

    /// Recupera y verifica un artifact.
    fn retrieve(&self, hash: &str) -> Result<Artifact, StoreError> {
        let artifact = self.load_raw(hash)?.ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
        let actual = artifact.recompute_hash();
        if actual != hash || artifact.content_hash != hash {
            return Err(StoreError::Integrity { key: hash.to_string(),
                                               actual });
        }
        Ok(artifact)
    }

    /// Cadena completa de ancestros, en anchura: dependencias directas primero
    /// (en su orden declarado), sin duplicados.
    fn dependencies_of(&self, hash: &str) -> Result<Vec<Artifact>, StoreError> {
        let root = self.retrieve(hash)?;
        let mut seen: IndexMap<String, Artifact> = IndexMap::new();
        let mut queue: VecDeque<(String, String)> = root.dependency_hashes
                                                        .iter()
                                                        .map(|d| (d.clone(), root.content_hash.clone()))
                                                        .collect();
        while let Some((current, parent)) = queue.pop_front() {
            if seen.contains_key(&current) {
                continue;
            }
            let artifact = match self.retrieve(&current) {
                Err(StoreError::NotFound(_)) => {
                    return Err(StoreError::BrokenChain { missing: current,
                                                         referenced_by: parent })
                }
                other => other?,
            };
            for dep in &artifact.dependency_hashes {
                queue.push_back((dep.clone(), current.clone()));
            }
            seen.insert(current, artifact);
        }
        Ok(seen.into_values().collect())
    }

    /// Verifica el artifact y todos sus ancestros; devuelve cuántos artifacts
    /// se verificaron (incluido él mismo) o el primer error encontrado.
    fn verify_chain(&self, hash: &str) -> Result<usize, StoreError> {
        let ancestors = self.dependencies_of(hash)?;
        Ok(ancestors.len() + 1)
    }

    /// `true` si la cadena completa existe y todos los hashes coinciden.
    fn validate_chain(&self, hash: &str) -> bool {
        match self.verify_chain(hash) {
            Ok(_) => true,
            Err(e) => {
                debug!("validate_chain({hash}) failed: {e}");
                false
            }
        }
    }

    /// Último artifact registrado con ese fingerprint de entradas (caché de
    /// etapas). Los backends pueden indexarlo.
    fn find_by_input_fingerprint(&self, fingerprint: &str) -> Result<Option<Artifact>, StoreError> {
        let records = self.records()?;
        let hit = records.iter()
                         .rev()
                         .find(|r| r.input_fingerprint.as_deref() == Some(fingerprint))
                         .map(|r| r.content_hash.clone());
        match hit {
            Some(hash) => self.retrieve(&hash).map(Some),
            None => Ok(None),
        }
    }
}

fn check_dependency_shape(draft: &ArtifactDraft) -> Result<(), StoreError> {
    let deps = &draft.dependency_hashes;
    match (draft.stage, deps.is_empty()) {
        (Stage::Ingest, false) => {
            return Err(StoreError::InvalidDependencies { stage: draft.stage,
                                                         detail: "ingest artifacts cannot have dependencies".into() })
        }
        (Stage::Ingest, true) => {}
        (_, true) => {
            return Err(StoreError::InvalidDependencies { stage: draft.stage,
                                                         detail: "derived artifacts need at least one dependency".into() })
        }
        (_, false) => {}
    }
    let mut unique: Vec<&String> = deps.iter().collect();
    unique.sort();
    unique.dedup();
    if unique.len() != deps.len() {
        return Err(StoreError::InvalidDependencies { stage: draft.stage,
                                                     detail: "dependency_hashes contains duplicates".into() });
    }
    Ok(())
}

/// Decide entre idempotencia, version skew o corrupción cuando el hash ya
/// existe.
fn reconcile(existing: Artifact, candidate: &Artifact) -> Result<Artifact, StoreError> {
    if to_canonical_json(&existing.payload) != to_canonical_json(&candidate.payload) {
        return Err(StoreError::Integrity { key: candidate.content_hash.clone(),
                                           actual: existing.recompute_hash() });
    }
    if let Some(detail) = existing.material_mismatch(candidate) {
        return Err(StoreError::DuplicateContent { hash: candidate.content_hash.clone(),
                                                  detail });
    }
    if existing.qa_result.outcome != candidate.qa_result.outcome {
        debug!("store: {} already recorded with qa={}, keeping the original result",
               existing.content_hash,
               existing.qa_result.outcome);
    }
    Ok(existing)
}
