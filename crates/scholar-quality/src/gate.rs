//! Composición de las seis capas.
//!
//! Un `Fail` corta la evaluación: las capas siguientes quedan `Skipped`. Las
//! capas 1 a 5 son por unidad; la 6 necesita el lote completo y por eso se
//! aplica en `finalize_batch`, después de la barrera de join.
use std::sync::Arc;

use log::debug;
use scholar_core::{AnalysisPayload, FrameworkSpec, LayerDiagnostic, LayerVerdict, PipelineConfig, QaLayer, QaResult,
                   QaThresholds, StatisticsPayload, SynthesisPayload};

use crate::evaluator::{EvaluationRequest, Evaluator};
use crate::layers::{anomaly, coherence, consistency, cross, input, response};

/// Respuesta completa de un LLM tal como llega al gate.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub text: String,
    pub finish_reason: Option<String>,
}

impl RawResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(),
               finish_reason: None }
    }
}

/// Unidad que superó el parseo; sus diagnósticos cubren las capas 1 a 5.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessedUnit {
    pub unit_id: String,
    pub payload: AnalysisPayload,
    pub diagnostics: Vec<LayerDiagnostic>,
}

impl AssessedUnit {
    pub fn failed(&self) -> bool {
        self.diagnostics.iter().any(LayerDiagnostic::is_fail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitAssessment {
    /// Sin payload utilizable: nunca llega al store.
    Rejected {
        reason: String,
        diagnostics: Vec<LayerDiagnostic>,
    },
    Assessed(AssessedUnit),
}

pub struct QualityGate {
    framework: FrameworkSpec,
    qa: QaThresholds,
    evaluators: Vec<Arc<dyn Evaluator>>,
}

/// Completa la lista con `Skipped` para las capas posteriores a `after`.
fn skip_from(mut diagnostics: Vec<LayerDiagnostic>, after: QaLayer, reason: &str) -> Vec<LayerDiagnostic> {
    for layer in QaLayer::ALL.iter().filter(|l| **l > after) {
        diagnostics.push(LayerDiagnostic::skipped(*layer, reason));
    }
    diagnostics
}

impl QualityGate {
    pub fn new(framework: FrameworkSpec, qa: QaThresholds) -> Self {
        Self { framework,
               qa,
               evaluators: Vec::new() }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(cfg.framework.clone(), cfg.qa.clone())
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn framework(&self) -> &FrameworkSpec {
        &self.framework
    }

    pub fn thresholds(&self) -> &QaThresholds {
        &self.qa
    }

    /// Capa 1. Un `Fail` impide la llamada al LLM.
    pub fn check_input(&self, text: &str) -> LayerDiagnostic {
        input::check_input(text, &self.framework, &self.qa)
    }

    /// Diagnósticos completos para una unidad rechazada en la capa 1.
    pub fn input_rejection(&self, failed: LayerDiagnostic) -> Vec<LayerDiagnostic> {
        skip_from(vec![failed], QaLayer::InputValidation, "input rejected")
    }

    /// Diagnósticos para una unidad cuya llamada LLM agotó los reintentos:
    /// se registra como fallo de la capa 2.
    pub fn exhausted_rejection(&self, input_ok: LayerDiagnostic, error: &str) -> Vec<LayerDiagnostic> {
        skip_from(vec![input_ok,
                       LayerDiagnostic::fail(QaLayer::ResponseValidation, format!("no response after retries: {error}"))],
                  QaLayer::ResponseValidation,
                  "no response")
    }

    /// Capas 1 a 5 sobre una respuesta completa.
    pub async fn assess_unit(&self, unit_id: &str, text: &str, response: &RawResponse) -> UnitAssessment {
        let l1 = self.check_input(text);
        if l1.is_fail() {
            return UnitAssessment::Rejected { reason: l1.detail.clone(),
                                              diagnostics: self.input_rejection(l1) };
        }
        let parsed = response::parse_analysis(unit_id, &response.text, response.finish_reason.as_deref(), &self.framework);
        let l2 = response::analysis_diagnostic(&parsed);
        let payload = match parsed {
            Ok(p) => p,
            Err(reason) => {
                debug!("gate: {unit_id} rejected at L2: {reason}");
                return UnitAssessment::Rejected { reason,
                                                  diagnostics: skip_from(vec![l1, l2],
                                                                         QaLayer::ResponseValidation,
                                                                         "unparseable response") };
            }
        };
        let mut diagnostics = vec![l1, l2];

        let l3 = coherence::check_coherence(&payload.scores, &self.framework, &self.qa);
        let l3_borderline = l3.verdict == LayerVerdict::Borderline;
        let l3_fail = l3.is_fail();
        diagnostics.push(l3);
        if l3_fail {
            return UnitAssessment::Assessed(AssessedUnit { unit_id: unit_id.to_string(),
                                                           payload,
                                                           diagnostics: skip_from(diagnostics,
                                                                                  QaLayer::StatisticalCoherence,
                                                                                  "short-circuit") });
        }

        let l4 = consistency::check_derived(&payload, self.qa.derived_tolerance);
        let l4_borderline = l4.verdict == LayerVerdict::Borderline;
        let l4_fail = l4.is_fail();
        diagnostics.push(l4);
        if l4_fail {
            return UnitAssessment::Assessed(AssessedUnit { unit_id: unit_id.to_string(),
                                                           payload,
                                                           diagnostics: skip_from(diagnostics,
                                                                                  QaLayer::MathematicalConsistency,
                                                                                  "short-circuit") });
        }

        let l5 = if l3_borderline || l4_borderline || self.qa.always_cross_validate {
            let request = EvaluationRequest { unit_id: unit_id.to_string(),
                                              text: text.to_string(),
                                              framework: self.framework.clone() };
            cross::cross_validate(&payload.scores, &request, &self.evaluators, self.qa.cross_validation_tolerance).await
        } else {
            LayerDiagnostic::skipped(QaLayer::CrossValidation, "not required")
        };
        diagnostics.push(l5);
        UnitAssessment::Assessed(AssessedUnit { unit_id: unit_id.to_string(),
                                                payload,
                                                diagnostics })
    }

    /// Capa 6 sobre el lote y resultado final por unidad (mismo orden que
    /// `units`). Las unidades que ya fallaron no participan del lote.
    pub fn finalize_batch(&self, units: &[AssessedUnit]) -> Vec<QaResult> {
        let eligible: Vec<usize> = (0..units.len()).filter(|i| !units[*i].failed()).collect();
        let batch: Vec<_> = eligible.iter().map(|i| &units[*i].payload.scores).collect();
        let mut l6 = anomaly::detect_anomalies(&batch, self.qa.anomaly_z_threshold).into_iter();
        units.iter()
             .map(|u| {
                 let mut diagnostics = u.diagnostics.clone();
                 // Las unidades fallidas ya llevan la capa 6 como skipped.
                 if !u.failed() {
                     diagnostics.push(l6.next()
                                        .unwrap_or_else(|| LayerDiagnostic::skipped(QaLayer::AnomalyDetection, "not in batch")));
                 }
                 QaResult::from_diagnostics(diagnostics)
             })
             .collect()
    }

    /// QA de un artifact estadístico: estructura (capa 2) y medias
    /// recalculadas (capa 4).
    pub fn check_statistics(&self, stats: &StatisticsPayload, inputs: &[AnalysisPayload]) -> QaResult {
        let missing: Vec<&String> = self.framework
                                        .dimensions
                                        .iter()
                                        .filter(|d| !stats.dimensions.contains_key(*d))
                                        .collect();
        let non_finite = stats.dimensions
                              .iter()
                              .find(|(_, s)| ![s.mean, s.std_dev, s.min, s.max].iter().all(|v| v.is_finite()));
        let l2 = if !missing.is_empty() {
            LayerDiagnostic::fail(QaLayer::ResponseValidation, format!("statistics lack dimensions {missing:?}"))
        } else if let Some((dim, _)) = non_finite {
            LayerDiagnostic::fail(QaLayer::ResponseValidation, format!("statistics for {dim} are not finite"))
        } else {
            LayerDiagnostic::pass(QaLayer::ResponseValidation, format!("{} dimensions", stats.dimensions.len()))
        };
        if l2.is_fail() {
            return QaResult::from_diagnostics(vec![l2]);
        }
        let l4 = consistency::check_statistics(stats, inputs, 1e-6);
        QaResult::from_diagnostics(vec![l2, l4])
    }

    /// QA de una narrativa de síntesis (capa 2).
    pub fn check_synthesis(&self, synthesis: &SynthesisPayload, finish_reason: Option<&str>, known: &[String]) -> QaResult {
        QaResult::from_diagnostics(vec![response::check_synthesis(synthesis, finish_reason, known)])
    }
}
