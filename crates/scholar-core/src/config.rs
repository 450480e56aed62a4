//! Definición declarativa del pipeline (`PipelineConfig`).
//!
//! Se carga desde un JSON. Todos los umbrales del gate tienen valor por
//! defecto salvo `cross_validation_tolerance`, que debe declararse
//! explícitamente.
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::constants::ENGINE_VERSION;
use crate::hashing::{fingerprint_value, hash_value};
use crate::model::Stage;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("cannot read pipeline definition {path}: {detail}")]
    Read { path: String, detail: String },
    #[error("invalid pipeline definition: {0}")]
    Parse(String),
    #[error("invalid pipeline configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkSpec {
    pub name: String,
    pub version: String,
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub score_min: f64,
    #[serde(default = "default_score_max")]
    pub score_max: f64,
    /// Valor que el LLM suele devolver cuando no analizó nada.
    #[serde(default)]
    pub default_score: f64,
}

fn default_score_max() -> f64 {
    10.0
}

impl FrameworkSpec {
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.name.trim().is_empty() {
            out.push("framework name is empty".to_string());
        }
        if self.dimensions.is_empty() {
            out.push("framework has no dimensions".to_string());
        }
        if self.dimensions.iter().any(|d| d.trim().is_empty()) {
            out.push("framework has an empty dimension name".to_string());
        }
        let mut sorted = self.dimensions.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != self.dimensions.len() {
            out.push("framework dimensions are not unique".to_string());
        }
        if !(self.score_min.is_finite() && self.score_max.is_finite()) || self.score_min >= self.score_max {
            out.push(format!("invalid score range [{}, {}]", self.score_min, self.score_max));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3,
               base_delay_ms: 200,
               max_delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    /// Espera antes del intento `attempt` (1-based): base * 2^(attempt-1),
    /// acotada por `max_delay_ms`.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay_ms.saturating_mul(1u64 << exp).min(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    pub max_concurrent_calls: usize,
    /// Tope de llamadas LLM por run (costo). `None` = sin tope.
    pub max_total_calls: Option<u64>,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self { max_concurrent_calls: 4,
               max_total_calls: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaThresholds {
    #[serde(default = "default_min_text")]
    pub min_text_chars: usize,
    #[serde(default = "default_max_text")]
    pub max_text_chars: usize,
    #[serde(default = "default_min_variance")]
    pub min_score_variance: f64,
    #[serde(default = "default_derived_tolerance")]
    pub derived_tolerance: f64,
    /// Sin valor por defecto: se exige en la definición.
    pub cross_validation_tolerance: f64,
    #[serde(default)]
    pub always_cross_validate: bool,
    #[serde(default = "default_z")]
    pub anomaly_z_threshold: f64,
    #[serde(default = "default_min_units")]
    pub min_units_for_statistics: usize,
}

fn default_min_text() -> usize {
    20
}
fn default_max_text() -> usize {
    200_000
}
fn default_min_variance() -> f64 {
    0.05
}
fn default_derived_tolerance() -> f64 {
    0.02
}
fn default_z() -> f64 {
    3.0
}
fn default_min_units() -> usize {
    2
}

impl QaThresholds {
    pub fn with_cross_validation_tolerance(tolerance: f64) -> Self {
        Self { min_text_chars: default_min_text(),
               max_text_chars: default_max_text(),
               min_score_variance: default_min_variance(),
               derived_tolerance: default_derived_tolerance(),
               cross_validation_tolerance: tolerance,
               always_cross_validate: false,
               anomaly_z_threshold: default_z(),
               min_units_for_statistics: default_min_units() }
    }
}

/// Comando externo que actúa como cliente LLM (prompt por stdin, respuesta
/// por stdout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_timeout() -> u64 {
    60_000
}

/// Evaluador independiente de la capa 5. Sin `llm` repite la llamada con el
/// cliente primario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub name: String,
    #[serde(default)]
    pub llm: Option<LlmCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default = "default_stages")]
    pub stages: Vec<Stage>,
    pub framework: FrameworkSpec,
    /// Versión de la lógica/prompt por etapa. Las etapas ausentes usan
    /// `ENGINE_VERSION`.
    #[serde(default)]
    pub producer_versions: BTreeMap<Stage, String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub rate_limit: RateLimit,
    pub qa: QaThresholds,
    #[serde(default)]
    pub llm: Option<LlmCommand>,
    /// Evaluadores de la validación cruzada, en orden de declaración.
    #[serde(default)]
    pub evaluators: Vec<EvaluatorConfig>,
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_stages() -> Vec<Stage> {
    Stage::ALL.to_vec()
}

impl PipelineConfig {
    /// Configuración mínima con todas las etapas; útil en tests y dry runs.
    pub fn new(name: impl Into<String>, framework: FrameworkSpec, cross_validation_tolerance: f64) -> Self {
        Self { name: name.into(),
               stages: default_stages(),
               framework,
               producer_versions: BTreeMap::new(),
               retry: RetryPolicy::default(),
               rate_limit: RateLimit::default(),
               qa: QaThresholds::with_cross_validation_tolerance(cross_validation_tolerance),
               llm: None,
               evaluators: Vec::new(),
               log_filter: None }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: PipelineConfig = serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read { path: path.display().to_string(),
                                                                                   detail: e.to_string() })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = self.framework.problems();
        if !self.stages.contains(&Stage::Ingest) || !self.stages.contains(&Stage::Analysis) {
            problems.push("stages must include ingest and analysis".into());
        }
        let mut sorted = self.stages.clone();
        sorted.sort();
        sorted.dedup();
        if sorted != self.stages {
            problems.push("stages must be unique and in pipeline order".into());
        }
        for stage in &self.stages {
            if let Some(input) = stage.declared_input() {
                if !self.stages.contains(&input) {
                    problems.push(format!("stage {stage} requires {input}"));
                }
            }
        }
        let qa = &self.qa;
        if !(qa.cross_validation_tolerance.is_finite() && qa.cross_validation_tolerance >= 0.0) {
            problems.push("qa.cross_validation_tolerance must be a finite non-negative number".into());
        }
        if qa.min_text_chars > qa.max_text_chars {
            problems.push("qa.min_text_chars exceeds qa.max_text_chars".into());
        }
        if !(qa.derived_tolerance > 0.0) || !(qa.anomaly_z_threshold > 0.0) || qa.min_score_variance < 0.0 {
            problems.push("qa tolerances must be positive".into());
        }
        if qa.min_units_for_statistics == 0 {
            problems.push("qa.min_units_for_statistics must be at least 1".into());
        }
        let mut names = HashSet::new();
        for ev in &self.evaluators {
            if ev.name.trim().is_empty() || !names.insert(ev.name.as_str()) {
                problems.push(format!("evaluator name {:?} is empty or repeated", ev.name));
            }
        }
        if self.rate_limit.max_concurrent_calls == 0 {
            problems.push("rate_limit.max_concurrent_calls must be at least 1".into());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }

    pub fn producer_version(&self, stage: Stage) -> String {
        self.producer_versions.get(&stage).cloned().unwrap_or_else(|| ENGINE_VERSION.to_string())
    }

    pub fn includes(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    /// Hash estable de la configuración completa (registrado en
    /// `RunInitialized`).
    pub fn config_hash(&self) -> String {
        match serde_json::to_value(self) {
            Ok(v) => hash_value(&v),
            Err(_) => String::new(),
        }
    }

    /// Fingerprint de una ejecución de etapa: etapa, hashes de entrada
    /// ordenados, versión del productor, versión del motor y la parte de la
    /// configuración que afecta al resultado.
    pub fn stage_fingerprint(&self, stage: Stage, input_hashes: &[String]) -> String {
        let mut inputs: Vec<&String> = input_hashes.iter().collect();
        inputs.sort();
        let relevant = match stage {
            Stage::Analysis => json!({ "framework": self.framework, "qa": self.qa, "evaluators": self.evaluators }),
            Stage::Statistics => json!({ "framework": self.framework, "min_units": self.qa.min_units_for_statistics }),
            Stage::Synthesis => json!({ "framework": self.framework.name }),
            Stage::Ingest | Stage::Export => json!(null),
        };
        fingerprint_value(&json!({
                              "engine_version": ENGINE_VERSION,
                              "stage": stage,
                              "inputs": inputs,
                              "producer_version": self.producer_version(stage),
                              "config": relevant,
                          }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framework() -> FrameworkSpec {
        FrameworkSpec { name: "pdaf".into(),
                        version: "1".into(),
                        dimensions: vec!["a".into(), "b".into()],
                        score_min: 0.0,
                        score_max: 10.0,
                        default_score: 0.0 }
    }

    #[test]
    fn cross_validation_tolerance_is_required() {
        let raw = r#"{"name":"x","framework":{"name":"f","version":"1","dimensions":["a"]},"qa":{}}"#;
        assert!(matches!(PipelineConfig::from_json_str(raw), Err(ConfigError::Parse(_))));
        let ok = r#"{"name":"x","framework":{"name":"f","version":"1","dimensions":["a"]},"qa":{"cross_validation_tolerance":0.5}}"#;
        let cfg = PipelineConfig::from_json_str(ok).unwrap();
        assert_eq!(cfg.stages, Stage::ALL.to_vec());
        assert_eq!(cfg.qa.derived_tolerance, 0.02);
    }

    #[test]
    fn evaluators_are_parsed_and_names_must_be_unique() {
        let raw = r#"{"name":"x","framework":{"name":"f","version":"1","dimensions":["a","b"]},
                      "qa":{"cross_validation_tolerance":0.5},
                      "evaluators":[{"name":"second-reader"},{"name":"judge","llm":{"program":"judge-llm"}}]}"#;
        let cfg = PipelineConfig::from_json_str(raw).unwrap();
        assert_eq!(cfg.evaluators.len(), 2);
        assert_eq!(cfg.evaluators[0].llm, None);
        assert_eq!(cfg.evaluators[1].llm.as_ref().map(|c| c.timeout_ms), Some(60_000));

        let mut dup = cfg.clone();
        dup.evaluators[1].name = "second-reader".into();
        assert!(matches!(dup.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("second-reader")));
        assert_ne!(cfg.stage_fingerprint(Stage::Analysis, &[]),
                   PipelineConfig::new("x", cfg.framework.clone(), 0.5).stage_fingerprint(Stage::Analysis, &[]));
    }

    #[test]
    fn stage_order_and_dependencies_are_validated() {
        let mut cfg = PipelineConfig::new("x", framework(), 0.5);
        cfg.stages = vec![Stage::Ingest, Stage::Analysis, Stage::Synthesis];
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("requires statistics")));
        cfg.stages = vec![Stage::Analysis, Stage::Ingest];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fingerprint_ignores_input_order_but_not_version() {
        let mut cfg = PipelineConfig::new("x", framework(), 0.5);
        let a = cfg.stage_fingerprint(Stage::Analysis, &["h2".into(), "h1".into()]);
        let b = cfg.stage_fingerprint(Stage::Analysis, &["h1".into(), "h2".into()]);
        assert_eq!(a, b);
        cfg.producer_versions.insert(Stage::Analysis, "prompt-v2".into());
        assert_ne!(a, cfg.stage_fingerprint(Stage::Analysis, &["h1".into(), "h2".into()]));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let p = RetryPolicy { max_retries: 5,
                              base_delay_ms: 100,
                              max_delay_ms: 350 };
        assert_eq!(p.delay_ms(1), 100);
        assert_eq!(p.delay_ms(2), 200);
        assert_eq!(p.delay_ms(3), 350);
    }
}
