//! Payloads tipados manteniendo el núcleo agnóstico.
//!
//! Cada tipo se serializa dentro de un sobre versionado:
//!
//! ```json
//! {"kind": "analysis", "schema_version": 1, "producer_version": "prompt-v3", "data": {...}}
//! ```
//!
//! `producer_version` forma parte del payload y por lo tanto del hash: una
//! nueva versión de prompt produce un artifact distinto en lugar de chocar con
//! el anterior.
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errores posibles al decodificar un payload tipado.
#[derive(Debug, Error, PartialEq)]
pub enum PayloadDecodeError {
    #[error("payload is not a versioned envelope")]
    NotAnEnvelope,
    #[error("kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: String, found: String },
    #[error("schema version mismatch: expected {expected}, found {found:?}")]
    VersionMismatch { expected: u32, found: Option<u64> },
    #[error("deserialize: {0}")]
    Deserialize(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Especificación de un payload tipado.
pub trait PayloadSpec: Sized + Serialize + DeserializeOwned + Clone {
    /// Etiqueta estable dentro del sobre.
    const KIND: &'static str;
    /// Versión de esquema (incrementar en cambios incompatibles).
    const SCHEMA_VERSION: u32 = 1;

    /// Validación estructural ligera (sin efectos secundarios).
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Serializa dentro del sobre versionado.
    fn into_payload(&self, producer_version: &str) -> Result<Value, PayloadDecodeError> {
        let data = serde_json::to_value(self).map_err(|e| PayloadDecodeError::Deserialize(e.to_string()))?;
        Ok(json!({
            "kind": Self::KIND,
            "schema_version": Self::SCHEMA_VERSION,
            "producer_version": producer_version,
            "data": data,
        }))
    }

    /// Decodifica verificando kind, versión y validación.
    fn from_payload(payload: &Value) -> Result<Self, PayloadDecodeError> {
        let obj = payload.as_object().ok_or(PayloadDecodeError::NotAnEnvelope)?;
        let kind = obj.get("kind").and_then(Value::as_str).ok_or(PayloadDecodeError::NotAnEnvelope)?;
        if kind != Self::KIND {
            return Err(PayloadDecodeError::KindMismatch { expected: Self::KIND.to_string(),
                                                          found: kind.to_string() });
        }
        let found = obj.get("schema_version").and_then(Value::as_u64);
        if found != Some(Self::SCHEMA_VERSION as u64) {
            return Err(PayloadDecodeError::VersionMismatch { expected: Self::SCHEMA_VERSION,
                                                             found });
        }
        let data = obj.get("data").cloned().ok_or(PayloadDecodeError::NotAnEnvelope)?;
        let decoded: Self = serde_json::from_value(data).map_err(|e| PayloadDecodeError::Deserialize(e.to_string()))?;
        decoded.validate().map_err(PayloadDecodeError::Validation)?;
        Ok(decoded)
    }
}

/// `producer_version` declarado dentro de un sobre, si existe.
pub fn envelope_producer_version(payload: &Value) -> Option<&str> {
    payload.get("producer_version").and_then(Value::as_str)
}

/// Documento fuente ya normalizado a texto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestPayload {
    pub unit_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
}

impl PayloadSpec for IngestPayload {
    const KIND: &'static str = "ingest";

    fn validate(&self) -> Result<(), String> {
        if self.unit_id.trim().is_empty() {
            return Err("unit_id is empty".into());
        }
        Ok(())
    }
}

/// Puntuaciones por dimensión producidas por el LLM para una unidad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub unit_id: String,
    pub framework: String,
    pub framework_version: String,
    pub scores: BTreeMap<String, f64>,
    /// Puntuaciones normalizadas declaradas por el productor (se verifican en
    /// la capa de consistencia matemática).
    pub derived: BTreeMap<String, f64>,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl AnalysisPayload {
    /// Normalización de referencia: `score / Σ scores`; ceros si la suma es 0.
    pub fn normalize(scores: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        let total: f64 = scores.values().sum();
        scores.iter()
              .map(|(k, v)| {
                  let n = if total.abs() < f64::EPSILON { 0.0 } else { v / total };
                  (k.clone(), n)
              })
              .collect()
    }
}

impl PayloadSpec for AnalysisPayload {
    const KIND: &'static str = "analysis";

    fn validate(&self) -> Result<(), String> {
        if self.unit_id.trim().is_empty() {
            return Err("unit_id is empty".into());
        }
        if self.scores.is_empty() {
            return Err("scores is empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionStats {
    pub n: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedUnit {
    pub unit_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Moderate,
    High,
}

/// Metadatos de confianza entregados por el motor estadístico.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsConfidence {
    pub method: String,
    pub sample_size: usize,
    pub level: ConfidenceLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsPayload {
    pub framework: String,
    pub dimensions: BTreeMap<String, DimensionStats>,
    pub included_units: Vec<String>,
    #[serde(default)]
    pub excluded_units: Vec<ExcludedUnit>,
    pub confidence: StatisticsConfidence,
}

impl PayloadSpec for StatisticsPayload {
    const KIND: &'static str = "statistics";

    fn validate(&self) -> Result<(), String> {
        if self.dimensions.is_empty() {
            return Err("no dimensions".into());
        }
        if self.included_units.is_empty() {
            return Err("no included units".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisPayload {
    pub title: String,
    /// Narrativa en Markdown.
    pub narrative: String,
    pub statistics_hash: String,
    #[serde(default)]
    pub cited_hashes: Vec<String>,
}

impl PayloadSpec for SynthesisPayload {
    const KIND: &'static str = "synthesis";

    fn validate(&self) -> Result<(), String> {
        if self.narrative.trim().is_empty() {
            return Err("narrative is empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AnalysisPayload {
        let scores: BTreeMap<String, f64> = [("care".to_string(), 0.6), ("fairness".to_string(), 0.2)].into();
        AnalysisPayload { unit_id: "doc-1".into(),
                          framework: "mft".into(),
                          framework_version: "1".into(),
                          derived: AnalysisPayload::normalize(&scores),
                          scores,
                          rationale: None }
    }

    #[test]
    fn envelope_carries_kind_and_producer_version() {
        let v = sample().into_payload("prompt-v2").unwrap();
        assert_eq!(v["kind"], "analysis");
        assert_eq!(envelope_producer_version(&v), Some("prompt-v2"));
        let back = AnalysisPayload::from_payload(&v).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let v = sample().into_payload("p").unwrap();
        let err = IngestPayload::from_payload(&v).unwrap_err();
        assert!(matches!(err, PayloadDecodeError::KindMismatch { .. }));
    }

    #[test]
    fn normalize_handles_zero_sum() {
        let scores: BTreeMap<String, f64> = [("a".to_string(), 0.0), ("b".to_string(), 0.0)].into();
        assert!(AnalysisPayload::normalize(&scores).values().all(|v| *v == 0.0));
        let n = AnalysisPayload::normalize(&sample().scores);
        assert!((n["care"] - 0.75).abs() < 1e-12);
    }
}
