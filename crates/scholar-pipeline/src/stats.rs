//! Motor estadístico: caja negra que recibe análisis validados y devuelve
//! estadísticas con metadatos de confianza.
use std::collections::BTreeMap;

use scholar_core::model::{ConfidenceLevel, DimensionStats, StatisticsConfidence};
use scholar_core::{AnalysisPayload, FrameworkSpec, StatisticsPayload};

pub trait StatisticsEngine: Send + Sync {
    fn get_name(&self) -> &str;

    /// `excluded_units` lo completa la etapa; el motor sólo ve las entradas
    /// aceptadas.
    fn compute(&self, framework: &FrameworkSpec, inputs: &[AnalysisPayload]) -> Result<StatisticsPayload, String>;
}

/// Estadística descriptiva por dimensión (media, desviación muestral, rango).
#[derive(Debug, Default, Clone, Copy)]
pub struct DescriptiveStatistics;

impl DescriptiveStatistics {
    fn level(n: usize) -> ConfidenceLevel {
        match n {
            0..=4 => ConfidenceLevel::Low,
            5..=29 => ConfidenceLevel::Moderate,
            _ => ConfidenceLevel::High,
        }
    }
}

impl StatisticsEngine for DescriptiveStatistics {
    fn get_name(&self) -> &str {
        "descriptive"
    }

    fn compute(&self, framework: &FrameworkSpec, inputs: &[AnalysisPayload]) -> Result<StatisticsPayload, String> {
        if inputs.is_empty() {
            return Err("no inputs".into());
        }
        let mut dimensions = BTreeMap::new();
        for dim in &framework.dimensions {
            let values: Vec<f64> = inputs.iter().filter_map(|a| a.scores.get(dim).copied()).collect();
            if values.len() != inputs.len() {
                return Err(format!("dimension {dim} missing in some inputs"));
            }
            let n = values.len();
            let mean = values.iter().sum::<f64>() / n as f64;
            let std_dev = if n > 1 {
                (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
            } else {
                0.0
            };
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            dimensions.insert(dim.clone(),
                              DimensionStats { n,
                                               mean,
                                               std_dev,
                                               min,
                                               max });
        }
        Ok(StatisticsPayload { framework: framework.name.clone(),
                               dimensions,
                               included_units: inputs.iter().map(|a| a.unit_id.clone()).collect(),
                               excluded_units: Vec::new(),
                               confidence: StatisticsConfidence { method: self.get_name().to_string(),
                                                                  sample_size: inputs.len(),
                                                                  level: Self::level(inputs.len()) } })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptive_moments() {
        let fw = FrameworkSpec { name: "f".into(),
                                 version: "1".into(),
                                 dimensions: vec!["a".into()],
                                 score_min: 0.0,
                                 score_max: 10.0,
                                 default_score: 0.0 };
        let mk = |u: &str, v: f64| AnalysisPayload { unit_id: u.into(),
                                                     framework: "f".into(),
                                                     framework_version: "1".into(),
                                                     scores: [("a".to_string(), v)].into(),
                                                     derived: [("a".to_string(), 1.0)].into(),
                                                     rationale: None };
        let s = DescriptiveStatistics.compute(&fw, &[mk("u1", 2.0), mk("u2", 4.0)]).unwrap();
        let a = &s.dimensions["a"];
        assert_eq!((a.n, a.mean, a.min, a.max), (2, 3.0, 2.0, 4.0));
        assert!((a.std_dev - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(s.confidence.level, ConfidenceLevel::Low);
    }
}
