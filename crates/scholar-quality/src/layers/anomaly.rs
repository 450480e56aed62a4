//! Capa 6: detección de anomalías sobre el lote completo de un run.
//!
//! Nunca rechaza: sólo marca para revisión manual.
use std::collections::BTreeMap;

use scholar_core::{LayerDiagnostic, QaLayer};

use super::mean;

/// Mínimo de unidades para que un z-score tenga sentido.
pub const MIN_BATCH_FOR_Z: usize = 3;

/// Un diagnóstico por unidad, en el mismo orden que `batch`.
pub fn detect_anomalies(batch: &[&BTreeMap<String, f64>], z_threshold: f64) -> Vec<LayerDiagnostic> {
    const L: QaLayer = QaLayer::AnomalyDetection;
    let n = batch.len();
    if n >= 2 && batch.windows(2).all(|w| w[0] == w[1]) {
        return (0..n).map(|_| LayerDiagnostic::flag(L, format!("all {n} units share an identical score vector")))
                     .collect();
    }
    if n < MIN_BATCH_FOR_Z {
        return (0..n).map(|_| LayerDiagnostic::pass(L, format!("batch of {n} too small for z-scores")))
                     .collect();
    }
    let mut columns: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for scores in batch {
        for (dim, v) in scores.iter() {
            columns.entry(dim.as_str()).or_default().push(*v);
        }
    }
    let moments: BTreeMap<&str, (f64, f64)> =
        columns.iter()
               .map(|(dim, values)| {
                   let m = mean(values);
                   let sd = (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt();
                   (*dim, (m, sd))
               })
               .collect();
    batch.iter()
         .map(|scores| {
             let outliers: Vec<String> =
                 scores.iter()
                       .filter_map(|(dim, v)| {
                           let (m, sd) = moments.get(dim.as_str()).copied()?;
                           if sd <= f64::EPSILON {
                               return None;
                           }
                           let z = (v - m) / sd;
                           (z.abs() > z_threshold).then(|| format!("{dim} z={z:.2}"))
                       })
                       .collect();
             if outliers.is_empty() {
                 LayerDiagnostic::pass(L, format!("within {z_threshold} sd of batch"))
             } else {
                 LayerDiagnostic::flag(L, outliers.join(", "))
             }
         })
         .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholar_core::LayerVerdict;

    fn s(a: f64, b: f64) -> BTreeMap<String, f64> {
        [("a".to_string(), a), ("b".to_string(), b)].into()
    }

    #[test]
    fn identical_batch_is_flagged() {
        let x = s(3.0, 7.0);
        let out = detect_anomalies(&[&x, &x, &x], 3.0);
        assert!(out.iter().all(|d| d.verdict == LayerVerdict::Flag));
    }

    #[test]
    fn outlier_is_flagged_and_small_batch_passes() {
        let normal: Vec<BTreeMap<String, f64>> = (0..9).map(|i| s(4.0 + (i % 3) as f64 * 0.1, 5.0)).collect();
        let outlier = s(9.5, 5.0);
        let mut batch: Vec<&BTreeMap<String, f64>> = normal.iter().collect();
        batch.push(&outlier);
        let out = detect_anomalies(&batch, 2.5);
        assert_eq!(out[9].verdict, LayerVerdict::Flag);
        assert!(out[..9].iter().all(|d| d.verdict == LayerVerdict::Pass));

        let (a, b) = (s(1.0, 2.0), s(2.0, 1.0));
        assert!(detect_anomalies(&[&a, &b], 2.5).iter().all(|d| d.verdict == LayerVerdict::Pass));
    }
}
