//! Capa 3: coherencia estadística de las puntuaciones de una unidad.
use std::collections::BTreeMap;

use scholar_core::{FrameworkSpec, LayerDiagnostic, LayerVerdict, QaLayer, QaThresholds};

use super::variance;

pub fn check_coherence(scores: &BTreeMap<String, f64>, framework: &FrameworkSpec, qa: &QaThresholds) -> LayerDiagnostic {
    const L: QaLayer = QaLayer::StatisticalCoherence;
    if scores.values().all(|v| (v - framework.default_score).abs() < 1e-9) {
        return LayerDiagnostic::fail(L, format!("every score equals the framework default {}", framework.default_score));
    }
    let values: Vec<f64> = scores.values().copied().collect();
    // Con una sola dimensión la varianza no informa nada.
    if values.len() < 2 {
        return LayerDiagnostic::pass(L, "single dimension");
    }
    let var = variance(&values);
    if var < 1e-12 {
        return LayerDiagnostic::fail(L, "zero variance across dimensions");
    }
    if var < qa.min_score_variance {
        return LayerDiagnostic::new(L,
                                    LayerVerdict::Borderline,
                                    format!("variance {var:.4} below {}", qa.min_score_variance));
    }
    LayerDiagnostic::pass(L, format!("variance {var:.4}"))
}
