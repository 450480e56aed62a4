use std::collections::BTreeMap;
use std::sync::Arc;

use scholar_core::{FrameworkSpec, LayerVerdict, QaLayer, QaOutcome, QaThresholds};
use scholar_quality::{Evaluator, FixedEvaluator, QualityGate, RawResponse, UnitAssessment};

const TEXT: &str = "A long enough document about deliberation and public reason.";

fn framework() -> FrameworkSpec {
    FrameworkSpec { name: "deliberation".into(),
                    version: "2".into(),
                    dimensions: vec!["claims".into(), "evidence".into(), "reciprocity".into()],
                    score_min: 0.0,
                    score_max: 10.0,
                    default_score: 5.0 }
}

fn gate(tolerance: f64) -> QualityGate {
    let mut qa = QaThresholds::with_cross_validation_tolerance(tolerance);
    qa.min_score_variance = 1.0;
    QualityGate::new(framework(), qa)
}

fn response(scores: [f64; 3]) -> RawResponse {
    let total: f64 = scores.iter().sum();
    let d = |v: f64| if total == 0.0 { 0.0 } else { v / total };
    RawResponse::new(format!(r#"{{"scores":{{"claims":{},"evidence":{},"reciprocity":{}}},"derived":{{"claims":{},"evidence":{},"reciprocity":{}}}}}"#,
                             scores[0],
                             scores[1],
                             scores[2],
                             d(scores[0]),
                             d(scores[1]),
                             d(scores[2])))
}

fn assessed(a: UnitAssessment) -> scholar_quality::AssessedUnit {
    match a {
        UnitAssessment::Assessed(u) => u,
        UnitAssessment::Rejected { reason, .. } => panic!("unexpected rejection: {reason}"),
    }
}

#[tokio::test]
async fn default_scores_fail_layer_three_and_skip_the_rest() {
    let g = gate(0.5);
    let unit = assessed(g.assess_unit("u1", TEXT, &response([5.0, 5.0, 5.0])).await);
    let qa = g.finalize_batch(&[unit]).remove(0);
    assert_eq!(qa.outcome, QaOutcome::Fail);
    assert!(qa.diagnostic(QaLayer::StatisticalCoherence).unwrap().is_fail());
    assert_eq!(qa.diagnostic(QaLayer::MathematicalConsistency).unwrap().verdict, LayerVerdict::Skipped);
    assert_eq!(qa.diagnostic(QaLayer::AnomalyDetection).unwrap().verdict, LayerVerdict::Skipped);
    assert_eq!(qa.diagnostics.len(), 6);
}

#[tokio::test]
async fn unparseable_response_is_rejected_without_payload() {
    let g = gate(0.5);
    match g.assess_unit("u1", TEXT, &RawResponse::new("Sorry, I cannot score this.")).await {
        UnitAssessment::Rejected { diagnostics, .. } => {
            assert!(diagnostics[1].is_fail());
            assert_eq!(diagnostics.len(), 6);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn borderline_variance_triggers_cross_validation() {
    let near: Arc<dyn Evaluator> = Arc::new(FixedEvaluator::new("near",
                                                                BTreeMap::from([("claims".to_string(), 4.2),
                                                                                ("evidence".to_string(), 5.0),
                                                                                ("reciprocity".to_string(), 5.6)])));
    let g = gate(0.5).with_evaluator(near.clone());
    let unit = assessed(g.assess_unit("u1", TEXT, &response([4.0, 5.0, 5.5])).await);
    assert_eq!(unit.diagnostics[2].verdict, LayerVerdict::Borderline);
    assert_eq!(unit.diagnostics[4].verdict, LayerVerdict::Pass);

    let strict = gate(0.1).with_evaluator(near);
    let unit = assessed(strict.assess_unit("u1", TEXT, &response([4.0, 5.0, 5.5])).await);
    assert_eq!(unit.diagnostics[4].verdict, LayerVerdict::Flag);
    assert_eq!(strict.finalize_batch(&[unit])[0].outcome, QaOutcome::FlaggedForReview);
}

#[tokio::test]
async fn non_finite_or_partial_evaluator_scores_never_pass() {
    let nan: Arc<dyn Evaluator> = Arc::new(FixedEvaluator::new("nan",
                                                               BTreeMap::from([("claims".to_string(), f64::NAN),
                                                                               ("evidence".to_string(), f64::NAN),
                                                                               ("reciprocity".to_string(), f64::NAN)])));
    let partial: Arc<dyn Evaluator> = Arc::new(FixedEvaluator::new("partial",
                                                                   BTreeMap::from([("claims".to_string(), 4.0),
                                                                                   ("evidence".to_string(), 5.0)])));
    for evaluator in [nan, partial] {
        let g = gate(0.5).with_evaluator(evaluator);
        let unit = assessed(g.assess_unit("u1", TEXT, &response([4.0, 5.0, 5.5])).await);
        assert_eq!(unit.diagnostics[4].verdict, LayerVerdict::Flag);
        assert_eq!(g.finalize_batch(&[unit])[0].outcome, QaOutcome::FlaggedForReview);
    }
}

#[tokio::test]
async fn clear_scores_skip_cross_validation_and_pass() {
    let g = gate(0.5);
    let a = assessed(g.assess_unit("u1", TEXT, &response([1.0, 6.0, 9.0])).await);
    let b = assessed(g.assess_unit("u2", TEXT, &response([2.0, 7.0, 3.0])).await);
    assert_eq!(a.diagnostics[4].verdict, LayerVerdict::Skipped);
    let results = g.finalize_batch(&[a, b]);
    assert!(results.iter().all(|r| r.outcome == QaOutcome::Pass));
}

#[tokio::test]
async fn copied_batch_is_flagged_for_review() {
    let g = gate(0.5);
    let mut units = Vec::new();
    for id in ["u1", "u2", "u3"] {
        units.push(assessed(g.assess_unit(id, TEXT, &response([1.0, 6.0, 9.0])).await));
    }
    assert!(g.finalize_batch(&units).iter().all(|r| r.outcome == QaOutcome::FlaggedForReview));
}
