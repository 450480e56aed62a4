//! Resultado del QualityGate adjunto a cada artifact.
//!
//! El resultado se fija al crear el artifact y no se recalcula: una
//! re-evaluación produce un artifact nuevo.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capas del gate, en orden de evaluación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaLayer {
    InputValidation,
    ResponseValidation,
    StatisticalCoherence,
    MathematicalConsistency,
    CrossValidation,
    AnomalyDetection,
}

impl QaLayer {
    pub const ALL: [QaLayer; 6] = [QaLayer::InputValidation,
                                   QaLayer::ResponseValidation,
                                   QaLayer::StatisticalCoherence,
                                   QaLayer::MathematicalConsistency,
                                   QaLayer::CrossValidation,
                                   QaLayer::AnomalyDetection];

    /// Número de capa (1..=6).
    pub fn number(&self) -> u8 {
        match self {
            QaLayer::InputValidation => 1,
            QaLayer::ResponseValidation => 2,
            QaLayer::StatisticalCoherence => 3,
            QaLayer::MathematicalConsistency => 4,
            QaLayer::CrossValidation => 5,
            QaLayer::AnomalyDetection => 6,
        }
    }
}

impl fmt::Display for QaLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.number())
    }
}

/// Veredicto de una capa individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerVerdict {
    Pass,
    /// Pasa, pero cerca del umbral: dispara validación cruzada.
    Borderline,
    Fail,
    /// Requiere revisión manual; no rechaza automáticamente.
    Flag,
    /// No evaluada (cortocircuito o no aplica).
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDiagnostic {
    pub layer: QaLayer,
    pub verdict: LayerVerdict,
    pub detail: String,
}

impl LayerDiagnostic {
    pub fn new(layer: QaLayer, verdict: LayerVerdict, detail: impl Into<String>) -> Self {
        Self { layer,
               verdict,
               detail: detail.into() }
    }
    pub fn pass(layer: QaLayer, detail: impl Into<String>) -> Self {
        Self::new(layer, LayerVerdict::Pass, detail)
    }
    pub fn fail(layer: QaLayer, detail: impl Into<String>) -> Self {
        Self::new(layer, LayerVerdict::Fail, detail)
    }
    pub fn flag(layer: QaLayer, detail: impl Into<String>) -> Self {
        Self::new(layer, LayerVerdict::Flag, detail)
    }
    pub fn skipped(layer: QaLayer, detail: impl Into<String>) -> Self {
        Self::new(layer, LayerVerdict::Skipped, detail)
    }
    pub fn is_fail(&self) -> bool {
        self.verdict == LayerVerdict::Fail
    }
}

/// Resultado agregado del gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QaOutcome {
    Pass,
    Fail,
    FlaggedForReview,
}

impl QaOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            QaOutcome::Pass => "pass",
            QaOutcome::Fail => "fail",
            QaOutcome::FlaggedForReview => "flagged-for-review",
        }
    }
}

impl fmt::Display for QaOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaResult {
    pub outcome: QaOutcome,
    pub diagnostics: Vec<LayerDiagnostic>,
}

impl QaResult {
    /// Deriva el resultado a partir de los diagnósticos: cualquier `Fail`
    /// domina, luego cualquier `Flag`; si no, `Pass`.
    pub fn from_diagnostics(diagnostics: Vec<LayerDiagnostic>) -> Self {
        let outcome = if diagnostics.iter().any(|d| d.verdict == LayerVerdict::Fail) {
            QaOutcome::Fail
        } else if diagnostics.iter().any(|d| d.verdict == LayerVerdict::Flag) {
            QaOutcome::FlaggedForReview
        } else {
            QaOutcome::Pass
        };
        Self { outcome, diagnostics }
    }

    /// Resultado para etapas deterministas sin capas aplicables (p. ej. el
    /// manifiesto de export).
    pub fn deterministic(detail: impl Into<String>) -> Self {
        Self::from_diagnostics(vec![LayerDiagnostic::pass(QaLayer::ResponseValidation, detail)])
    }

    pub fn is_pass(&self) -> bool {
        self.outcome == QaOutcome::Pass
    }

    pub fn diagnostic(&self, layer: QaLayer) -> Option<&LayerDiagnostic> {
        self.diagnostics.iter().find(|d| d.layer == layer)
    }
}
