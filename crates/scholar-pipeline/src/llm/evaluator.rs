use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use scholar_core::{IngestPayload, PipelineConfig, RetryPolicy, Stage};
use scholar_quality::layers::response::parse_analysis;
use scholar_quality::{EvaluationRequest, Evaluator, EvaluatorError};

use super::{CommandLlmClient, LlmClient, LlmRequest};
use crate::exec::{call_with_retry, CancellationFlag, RetryNotice};
use crate::prompt::analysis_prompt;

/// Evaluador de la capa 5 respaldado por un `LlmClient`: repite el prompt de
/// análisis y devuelve las puntuaciones que el modelo asigna a la unidad.
pub struct LlmEvaluator {
    name: String,
    client: Arc<dyn LlmClient>,
    retry: RetryPolicy,
}

impl LlmEvaluator {
    pub fn new(name: impl Into<String>, client: Arc<dyn LlmClient>, retry: RetryPolicy) -> Self {
        Self { name: name.into(),
               client,
               retry }
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    fn get_name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, request: &EvaluationRequest) -> Result<BTreeMap<String, f64>, EvaluatorError> {
        let doc = IngestPayload { unit_id: request.unit_id.clone(),
                                  title: None,
                                  text: request.text.clone() };
        let llm_request = LlmRequest::new(Stage::Analysis,
                                          Some(request.unit_id.clone()),
                                          analysis_prompt(&request.framework, &doc)).for_evaluator(&self.name);
        let cancel = CancellationFlag::new();
        let response = call_with_retry(&self.retry, &cancel, |_: &RetryNotice| {}, || self.client.complete(&llm_request))
            .await
            .map_err(|e| EvaluatorError::Unavailable(e.to_string()))?;
        let parsed = parse_analysis(&request.unit_id, &response.text, response.finish_reason.as_deref(), &request.framework)
            .map_err(EvaluatorError::Invalid)?;
        debug!("evaluator {} scored {}", self.name, request.unit_id);
        Ok(parsed.scores)
    }
}

/// Construye los evaluadores declarados en `config.evaluators`. Los que no
/// traen comando propio reutilizan `primary`.
pub fn evaluators_from_config(config: &PipelineConfig, primary: &Arc<dyn LlmClient>) -> Vec<Arc<dyn Evaluator>> {
    config.evaluators
          .iter()
          .map(|ev| {
              let client: Arc<dyn LlmClient> = match &ev.llm {
                  Some(command) => Arc::new(CommandLlmClient::new(command.clone())),
                  None => primary.clone(),
              };
              Arc::new(LlmEvaluator::new(ev.name.clone(), client, config.retry.clone())) as Arc<dyn Evaluator>
          })
          .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmResponse, ScriptedLlmClient};
    use scholar_core::{EvaluatorConfig, FrameworkSpec};

    fn framework() -> FrameworkSpec {
        FrameworkSpec { name: "f".into(),
                        version: "1".into(),
                        dimensions: vec!["a".into(), "b".into()],
                        score_min: 0.0,
                        score_max: 10.0,
                        default_score: 5.0 }
    }

    fn request() -> EvaluationRequest {
        EvaluationRequest { unit_id: "u1".into(),
                            text: "some text".into(),
                            framework: framework() }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy { max_retries: 2,
                      base_delay_ms: 1,
                      max_delay_ms: 2 }
    }

    #[tokio::test]
    async fn scores_come_from_the_evaluator_key() {
        let client = Arc::new(ScriptedLlmClient::new().with_response("u1", r#"{"scores": {"a": 1, "b": 1}, "derived": {"a": 0.5, "b": 0.5}}"#)
                                                      .with_response("judge:u1", r#"{"scores": {"a": 3, "b": 7.5}, "derived": {"a": 0.3, "b": 0.7}}"#));
        let evaluator = LlmEvaluator::new("judge", client.clone(), retry());
        let scores = evaluator.evaluate(&request()).await.unwrap();
        assert_eq!(scores["a"], 3.0);
        assert_eq!(scores["b"], 7.5);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_reported_unavailable() {
        let client = Arc::new(ScriptedLlmClient::new().with_sequence("judge:u1",
                                                                     vec![Err(LlmError::Timeout(5)),
                                                                          Ok(LlmResponse::new(r#"{"scores": {"a": 2, "b": 2}, "derived": {"a": 0.5, "b": 0.5}}"#))]));
        let evaluator = LlmEvaluator::new("judge", client.clone(), retry());
        assert_eq!(evaluator.evaluate(&request()).await.unwrap()["a"], 2.0);
        assert_eq!(client.calls(), 2);

        let down = Arc::new(ScriptedLlmClient::new().with_sequence("judge:u1", vec![Err(LlmError::Unavailable("down".into()))]));
        let evaluator = LlmEvaluator::new("judge", down, retry());
        assert!(matches!(evaluator.evaluate(&request()).await, Err(EvaluatorError::Unavailable(_))));
    }

    #[tokio::test]
    async fn partial_answer_is_invalid() {
        let client = Arc::new(ScriptedLlmClient::new().with_response("judge:u1", r#"{"scores": {"a": 2}, "derived": {"a": 1, "b": 0}}"#));
        let evaluator = LlmEvaluator::new("judge", client, retry());
        match evaluator.evaluate(&request()).await {
            Err(EvaluatorError::Invalid(detail)) => assert!(detail.contains("lacks dimension b")),
            other => panic!("expected invalid answer, got {other:?}"),
        }
    }

    #[test]
    fn config_evaluators_keep_declaration_order() {
        let mut cfg = PipelineConfig::new("p", framework(), 0.5);
        cfg.evaluators = vec![EvaluatorConfig { name: "first".into(),
                                                llm: None },
                              EvaluatorConfig { name: "second".into(),
                                                llm: None }];
        let primary: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new());
        let names: Vec<String> = evaluators_from_config(&cfg, &primary).iter()
                                                                       .map(|e| e.get_name().to_string())
                                                                       .collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
