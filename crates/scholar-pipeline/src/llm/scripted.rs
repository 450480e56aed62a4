use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LlmClient, LlmError, LlmRequest, LlmResponse};

type Scripted = Result<LlmResponse, LlmError>;

/// Cliente que reproduce respuestas predefinidas por clave (`unit_id` o
/// etapa) y cuenta las llamadas. Para tests y dry runs.
///
/// - Cada clave tiene una cola; el último elemento se repite cuando la cola
///   se agota.
/// - Sin guion para una clave se usa `fallback`, si existe.
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallback: Option<LlmResponse>,
    calls: AtomicU64,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.with_sequence(key, vec![Ok(LlmResponse::new(text))])
    }

    pub fn with_sequence(self, key: impl Into<String>, sequence: Vec<Scripted>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(key.into(), sequence.into());
        }
        self
    }

    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(LlmResponse::new(text));
        self
    }

    /// Llamadas recibidas desde la creación.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn get_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = request.key();
        let next = {
            let mut scripts = self.scripts
                                  .lock()
                                  .map_err(|_| LlmError::Unavailable("script lock poisoned".into()))?;
            scripts.get_mut(&key).and_then(|queue| {
                                     if queue.len() > 1 {
                                         queue.pop_front()
                                     } else {
                                         queue.front().cloned()
                                     }
                                 })
        };
        match next {
            Some(scripted) => scripted,
            None => self.fallback
                        .clone()
                        .ok_or_else(|| LlmError::Rejected(format!("no scripted response for {key}"))),
        }
    }
}
