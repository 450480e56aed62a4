use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use scholar_core::RateLimit;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::llm::LlmError;

/// Presupuesto de llamadas LLM compartido por todos los workers de un run:
/// un semáforo de concurrencia y un tope total de llamadas (costo).
#[derive(Debug, Clone)]
pub struct RateBudget {
    permits: Arc<Semaphore>,
    used: Arc<AtomicU64>,
    max_total: Option<u64>,
}

/// Permiso de una llamada en curso; libera el cupo de concurrencia al soltarse.
#[derive(Debug)]
pub struct BudgetPermit {
    _permit: OwnedSemaphorePermit,
}

impl RateBudget {
    pub fn new(limit: &RateLimit) -> Self {
        Self { permits: Arc::new(Semaphore::new(limit.max_concurrent_calls.max(1))),
               used: Arc::new(AtomicU64::new(0)),
               max_total: limit.max_total_calls }
    }

    /// Espera un cupo de concurrencia y descuenta una llamada del total.
    /// Agotado el total devuelve `Rejected`: no tiene sentido reintentar.
    pub async fn acquire(&self) -> Result<BudgetPermit, LlmError> {
        let permit = Arc::clone(&self.permits).acquire_owned()
                                              .await
                                              .map_err(|_| LlmError::Unavailable("rate budget closed".into()))?;
        let used = self.used.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.max_total {
            if used > max {
                self.used.fetch_sub(1, Ordering::SeqCst);
                return Err(LlmError::Rejected(format!("call budget of {max} exhausted")));
            }
        }
        Ok(BudgetPermit { _permit: permit })
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }
}
