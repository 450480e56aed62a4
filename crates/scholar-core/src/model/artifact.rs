//! Artifact inmutable del pipeline.
//!
//! Un `Artifact` es la unidad de salida de una etapa. Es neutral:
//! - `payload` es JSON genérico; el store no interpreta su semántica.
//! - `content_hash` se calcula sobre el JSON canonicalizado del payload (ver
//!   `hashing::hash_value`) y es su identidad.
//! - Los metadatos (`stage`, `dependency_hashes`, `producer_version`,
//!   `created_at`, `qa_result`) no entran al hash.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{QaOutcome, QaResult, Stage};
use crate::hashing::hash_value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub content_hash: String,
    pub stage: Stage,
    pub payload: Value,
    pub dependency_hashes: Vec<String>,
    pub producer_version: String,
    pub created_at: DateTime<Utc>,
    pub qa_result: QaResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
}

impl Artifact {
    /// Recalcula el hash del payload actual.
    pub fn recompute_hash(&self) -> String {
        hash_value(&self.payload)
    }

    /// `true` si el payload sigue correspondiendo a su `content_hash`.
    pub fn verify(&self) -> bool {
        self.recompute_hash() == self.content_hash
    }

    pub fn qa_outcome(&self) -> QaOutcome {
        self.qa_result.outcome
    }

    /// Compara los metadatos que hacen "la misma" a dos escrituras del mismo
    /// contenido. Una diferencia aquí con igual hash es version skew.
    pub fn material_mismatch(&self, other: &Artifact) -> Option<String> {
        if self.stage != other.stage {
            return Some(format!("stage {} != {}", self.stage, other.stage));
        }
        if self.producer_version != other.producer_version {
            return Some(format!("producer_version {} != {}", self.producer_version, other.producer_version));
        }
        if self.dependency_hashes != other.dependency_hashes {
            return Some("dependency_hashes differ".to_string());
        }
        None
    }

    /// Registro de metadatos (sin payload) para el log append-only.
    pub fn metadata_record(&self, seq: u64) -> MetadataRecord {
        MetadataRecord { seq,
                         content_hash: self.content_hash.clone(),
                         stage: self.stage,
                         dependency_hashes: self.dependency_hashes.clone(),
                         producer_version: self.producer_version.clone(),
                         created_at: self.created_at,
                         qa_result: self.qa_result.clone(),
                         input_fingerprint: self.input_fingerprint.clone() }
    }
}

/// Artifact aún no persistido: lo que una etapa entrega al store.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDraft {
    pub stage: Stage,
    pub payload: Value,
    pub dependency_hashes: Vec<String>,
    pub producer_version: String,
    pub qa_result: QaResult,
    pub input_fingerprint: Option<String>,
}

impl ArtifactDraft {
    pub fn new(stage: Stage, payload: Value, producer_version: impl Into<String>, qa_result: QaResult) -> Self {
        Self { stage,
               payload,
               dependency_hashes: Vec::new(),
               producer_version: producer_version.into(),
               qa_result,
               input_fingerprint: None }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.dependency_hashes = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input_fingerprint(mut self, fp: impl Into<String>) -> Self {
        self.input_fingerprint = Some(fp.into());
        self
    }

    /// Materializa el artifact con hash y timestamp. Sólo el store debería
    /// llamar a esto.
    pub fn into_artifact(self, content_hash: String, created_at: DateTime<Utc>) -> Artifact {
        Artifact { content_hash,
                   stage: self.stage,
                   payload: self.payload,
                   dependency_hashes: self.dependency_hashes,
                   producer_version: self.producer_version,
                   created_at,
                   qa_result: self.qa_result,
                   input_fingerprint: self.input_fingerprint }
    }
}

/// Registro inmutable del log de metadatos. Los nombres de campo son los de
/// `constants::fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub seq: u64,
    pub content_hash: String,
    pub stage: Stage,
    pub dependency_hashes: Vec<String>,
    pub producer_version: String,
    pub created_at: DateTime<Utc>,
    pub qa_result: QaResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::fields;
    use serde_json::json;

    #[test]
    fn metadata_record_field_names_are_stable() {
        let draft = ArtifactDraft::new(Stage::Ingest, json!({"t": 1}), "v1", QaResult::deterministic("ok"))
            .with_input_fingerprint("fp");
        let art = draft.into_artifact(hash_value(&json!({"t": 1})), Utc::now());
        let rec = serde_json::to_value(art.metadata_record(0)).unwrap();
        for name in fields::REQUIRED {
            assert!(rec.get(name).is_some(), "missing field {name}");
        }
        assert!(rec.get(fields::INPUT_FINGERPRINT).is_some());
        assert!(rec.get("payload").is_none(), "metadata record must not carry the payload");
    }

    #[test]
    fn verify_detects_mutated_payload() {
        let payload = json!({"x": [1, 2]});
        let mut art = ArtifactDraft::new(Stage::Ingest, payload.clone(), "v1", QaResult::deterministic("ok"))
            .into_artifact(hash_value(&payload), Utc::now());
        assert!(art.verify());
        art.payload = json!({"x": [1, 3]});
        assert!(!art.verify());
    }
}
