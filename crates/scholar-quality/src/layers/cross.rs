//! Capa 5: validación cruzada con evaluadores independientes.
//!
//! Los evaluadores corren en paralelo (`JoinSet`) y el diagnóstico se emite
//! sólo cuando todos terminaron. Desacuerdo o error nunca pasan en silencio.
use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};
use scholar_core::{LayerDiagnostic, QaLayer};
use tokio::task::JoinSet;

use super::max_abs_diff;
use crate::evaluator::{EvaluationRequest, Evaluator};

pub async fn cross_validate(primary: &BTreeMap<String, f64>,
                            request: &EvaluationRequest,
                            evaluators: &[Arc<dyn Evaluator>],
                            tolerance: f64)
                            -> LayerDiagnostic {
    const L: QaLayer = QaLayer::CrossValidation;
    if evaluators.is_empty() {
        return LayerDiagnostic::flag(L, "cross-validation required but no evaluator configured");
    }
    let mut set = JoinSet::new();
    for ev in evaluators {
        let ev = Arc::clone(ev);
        let req = request.clone();
        set.spawn(async move {
               let name = ev.get_name().to_string();
               (name, ev.evaluate(&req).await)
           });
    }
    let mut problems = Vec::new();
    let mut worst = 0.0_f64;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, Ok(scores))) => {
                let diff = max_abs_diff(primary, &scores);
                debug!("cross-validation {}: evaluator {name} max diff {diff:.4}", request.unit_id);
                worst = worst.max(diff);
                if diff > tolerance {
                    problems.push(format!("{name} disagrees by {diff:.4}"));
                }
            }
            Ok((name, Err(e))) => {
                warn!("cross-validation {}: evaluator {name} failed: {e}", request.unit_id);
                problems.push(format!("{name} failed: {e}"));
            }
            Err(e) => problems.push(format!("evaluator task aborted: {e}")),
        }
    }
    if problems.is_empty() {
        LayerDiagnostic::pass(L,
                              format!("{} evaluator(s) agree within {tolerance} (max diff {worst:.4})",
                                      evaluators.len()))
    } else {
        problems.sort();
        LayerDiagnostic::flag(L, problems.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{EvaluatorError, FixedEvaluator};
    use async_trait::async_trait;
    use scholar_core::{FrameworkSpec, LayerVerdict};

    struct Broken;

    #[async_trait]
    impl Evaluator for Broken {
        fn get_name(&self) -> &str {
            "broken"
        }
        async fn evaluate(&self, _r: &EvaluationRequest) -> Result<BTreeMap<String, f64>, EvaluatorError> {
            Err(EvaluatorError::Unavailable("down".into()))
        }
    }

    fn scores(a: f64, b: f64) -> BTreeMap<String, f64> {
        [("a".to_string(), a), ("b".to_string(), b)].into()
    }

    fn request() -> EvaluationRequest {
        EvaluationRequest { unit_id: "u".into(),
                            text: "t".into(),
                            framework: FrameworkSpec { name: "f".into(),
                                                       version: "1".into(),
                                                       dimensions: vec!["a".into(), "b".into()],
                                                       score_min: 0.0,
                                                       score_max: 10.0,
                                                       default_score: 0.0 } }
    }

    #[tokio::test]
    async fn agreement_within_tolerance_passes_and_beyond_flags() {
        let close: Arc<dyn Evaluator> = Arc::new(FixedEvaluator::new("close", scores(2.4, 6.0)));
        let far: Arc<dyn Evaluator> = Arc::new(FixedEvaluator::new("far", scores(5.0, 6.0)));
        let primary = scores(2.0, 6.0);
        let d = cross_validate(&primary, &request(), &[close.clone()], 0.5).await;
        assert_eq!(d.verdict, LayerVerdict::Pass);
        let d = cross_validate(&primary, &request(), &[close, far], 0.5).await;
        assert_eq!(d.verdict, LayerVerdict::Flag);
        assert!(d.detail.contains("far disagrees"));
    }

    #[tokio::test]
    async fn nan_or_partial_evaluator_scores_flag() {
        let primary = scores(2.0, 6.0);
        let nan: Arc<dyn Evaluator> = Arc::new(FixedEvaluator::new("nan", scores(f64::NAN, f64::NAN)));
        let d = cross_validate(&primary, &request(), &[nan], 0.5).await;
        assert_eq!(d.verdict, LayerVerdict::Flag);
        assert!(d.detail.contains("nan disagrees"));

        let partial: Arc<dyn Evaluator> = Arc::new(FixedEvaluator::new("partial", [("a".to_string(), 2.0)].into()));
        let d = cross_validate(&primary, &request(), &[partial], 0.5).await;
        assert_eq!(d.verdict, LayerVerdict::Flag);
    }

    #[test]
    fn evaluator_error_or_absence_flags() {
        let primary = scores(2.0, 6.0);
        let broken: Arc<dyn Evaluator> = Arc::new(Broken);
        let with_error = tokio_test::block_on(cross_validate(&primary, &request(), &[broken], 0.5));
        assert_eq!(with_error.verdict, LayerVerdict::Flag);
        let without = tokio_test::block_on(cross_validate(&primary, &request(), &[], 0.5));
        assert_eq!(without.verdict, LayerVerdict::Flag);
    }
}
