//! Capas individuales del gate. Cada una devuelve un `LayerDiagnostic`; la
//! composición y el cortocircuito viven en `gate`.
pub mod anomaly;
pub mod coherence;
pub mod consistency;
pub mod cross;
pub mod input;
pub mod response;

use std::collections::BTreeMap;

/// Varianza poblacional; 0 para menos de dos valores.
pub(crate) fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Máxima diferencia absoluta por dimensión entre dos vectores de
/// puntuaciones. Una dimensión ausente en `other`, o un valor no finito en
/// cualquiera de los dos, cuenta como infinita.
pub(crate) fn max_abs_diff(primary: &BTreeMap<String, f64>, other: &BTreeMap<String, f64>) -> f64 {
    primary.iter()
           .map(|(k, v)| match other.get(k) {
               Some(o) if v.is_finite() && o.is_finite() => (v - o).abs(),
               _ => f64::INFINITY,
           })
           .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_or_missing_scores_count_as_infinite() {
        let primary: BTreeMap<String, f64> = [("a".to_string(), 2.0), ("b".to_string(), 6.0)].into();
        let nan: BTreeMap<String, f64> = [("a".to_string(), f64::NAN), ("b".to_string(), 6.0)].into();
        let partial: BTreeMap<String, f64> = [("a".to_string(), 2.0)].into();
        let close: BTreeMap<String, f64> = [("a".to_string(), 2.5), ("b".to_string(), 6.0)].into();
        assert_eq!(max_abs_diff(&primary, &nan), f64::INFINITY);
        assert_eq!(max_abs_diff(&primary, &partial), f64::INFINITY);
        assert_eq!(max_abs_diff(&primary, &close), 0.5);
    }
}
