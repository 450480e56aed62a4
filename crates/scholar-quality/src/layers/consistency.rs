//! Capa 4: consistencia matemática.
//!
//! - Análisis: `derived[k]` debe ser `scores[k] / Σ scores`.
//! - Estadística: las medias declaradas deben salir de los análisis incluidos.
use std::collections::BTreeMap;

use scholar_core::{AnalysisPayload, LayerDiagnostic, LayerVerdict, QaLayer, StatisticsPayload};

use super::mean;

pub fn check_derived(payload: &AnalysisPayload, tolerance: f64) -> LayerDiagnostic {
    const L: QaLayer = QaLayer::MathematicalConsistency;
    let expected = AnalysisPayload::normalize(&payload.scores);
    let mut worst = (String::new(), 0.0_f64);
    for (dim, exp) in &expected {
        let claimed = payload.derived.get(dim).copied().unwrap_or(f64::NAN);
        let dev = if claimed.is_finite() { (claimed - exp).abs() } else { f64::INFINITY };
        if dev > worst.1 {
            worst = (dim.clone(), dev);
        }
    }
    let (dim, dev) = worst;
    if dev > tolerance {
        LayerDiagnostic::fail(L, format!("derived.{dim} deviates by {dev:.4} (tolerance {tolerance})"))
    } else if dev > tolerance / 2.0 {
        LayerDiagnostic::new(L,
                             LayerVerdict::Borderline,
                             format!("derived.{dim} deviates by {dev:.4}, close to tolerance {tolerance}"))
    } else {
        LayerDiagnostic::pass(L, format!("max deviation {dev:.4}"))
    }
}

pub fn check_statistics(stats: &StatisticsPayload, inputs: &[AnalysisPayload], tolerance: f64) -> LayerDiagnostic {
    const L: QaLayer = QaLayer::MathematicalConsistency;
    let included: Vec<&AnalysisPayload> =
        inputs.iter().filter(|a| stats.included_units.contains(&a.unit_id)).collect();
    if included.len() != stats.included_units.len() {
        return LayerDiagnostic::fail(L,
                                     format!("{} included units declared, {} analysis inputs found",
                                             stats.included_units.len(),
                                             included.len()));
    }
    let mut by_dim: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for a in &included {
        for (dim, v) in &a.scores {
            by_dim.entry(dim.as_str()).or_default().push(*v);
        }
    }
    for (dim, declared) in &stats.dimensions {
        let values = by_dim.get(dim.as_str()).cloned().unwrap_or_default();
        if declared.n != values.len() {
            return LayerDiagnostic::fail(L, format!("{dim}: n={} but {} values", declared.n, values.len()));
        }
        let recomputed = mean(&values);
        if !declared.mean.is_finite() || (declared.mean - recomputed).abs() > tolerance {
            return LayerDiagnostic::fail(L, format!("{dim}: declared mean {} != recomputed {recomputed:.6}", declared.mean));
        }
    }
    LayerDiagnostic::pass(L, format!("{} dimension means recomputed", stats.dimensions.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholar_core::model::{ConfidenceLevel, DimensionStats, StatisticsConfidence};

    fn payload(scores: [f64; 2], derived: [f64; 2]) -> AnalysisPayload {
        AnalysisPayload { unit_id: "u".into(),
                          framework: "f".into(),
                          framework_version: "1".into(),
                          scores: [("a".to_string(), scores[0]), ("b".to_string(), scores[1])].into(),
                          derived: [("a".to_string(), derived[0]), ("b".to_string(), derived[1])].into(),
                          rationale: None }
    }

    #[test]
    fn derived_deviation_grades() {
        assert_eq!(check_derived(&payload([1.0, 3.0], [0.25, 0.75]), 0.02).verdict, LayerVerdict::Pass);
        assert_eq!(check_derived(&payload([1.0, 3.0], [0.265, 0.735]), 0.02).verdict, LayerVerdict::Borderline);
        assert!(check_derived(&payload([1.0, 3.0], [0.5, 0.5]), 0.02).is_fail());
    }

    #[test]
    fn zero_sum_expects_zero_derived() {
        assert_eq!(check_derived(&payload([0.0, 0.0], [0.0, 0.0]), 0.02).verdict, LayerVerdict::Pass);
        assert!(check_derived(&payload([0.0, 0.0], [0.5, 0.5]), 0.02).is_fail());
    }

    #[test]
    fn statistics_means_are_recomputed() {
        let mut a = payload([2.0, 4.0], [0.0, 0.0]);
        a.unit_id = "u1".into();
        let mut b = payload([4.0, 8.0], [0.0, 0.0]);
        b.unit_id = "u2".into();
        let stat = |mean_a: f64| StatisticsPayload { framework: "f".into(),
                                                     dimensions: [("a".to_string(),
                                                                   DimensionStats { n: 2,
                                                                                    mean: mean_a,
                                                                                    std_dev: 1.0,
                                                                                    min: 2.0,
                                                                                    max: 4.0 })].into(),
                                                     included_units: vec!["u1".into(), "u2".into()],
                                                     excluded_units: vec![],
                                                     confidence: StatisticsConfidence { method: "descriptive".into(),
                                                                                        sample_size: 2,
                                                                                        level: ConfidenceLevel::Low } };
        let inputs = vec![a, b];
        assert!(!check_statistics(&stat(3.0), &inputs, 1e-6).is_fail());
        assert!(check_statistics(&stat(3.5), &inputs, 1e-6).is_fail());
    }
}
