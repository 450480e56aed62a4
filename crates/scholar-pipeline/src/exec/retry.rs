use std::future::Future;
use std::time::Duration;

use log::warn;
use scholar_core::RetryPolicy;

use super::CancellationFlag;
use crate::llm::LlmError;

/// Aviso emitido antes de cada reintento (para registrar `RetryScheduled`).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    pub attempt: u32,
    pub delay_ms: u64,
    pub error: LlmError,
}

/// Reintenta `call` con backoff exponencial mientras el error sea transitorio.
///
/// Política:
/// - Como máximo `policy.max_retries` reintentos tras el primer intento.
/// - Espera `policy.delay_ms(n)` antes del reintento n.
/// - Se emite `warn!` por intento; una cancelación corta los reintentos y
///   devuelve el último error.
pub async fn call_with_retry<T, F, Fut>(policy: &RetryPolicy,
                                        cancel: &CancellationFlag,
                                        mut on_retry: impl FnMut(&RetryNotice),
                                        mut call: F)
                                        -> Result<T, LlmError>
    where F: FnMut() -> Fut,
          Fut: Future<Output = Result<T, LlmError>>
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(e) if e.is_transient() && attempt < policy.max_retries && !cancel.is_cancelled() => {
                attempt += 1;
                let delay_ms = policy.delay_ms(attempt);
                warn!("transient llm error (attempt {attempt}): {e} -> sleeping {delay_ms}ms");
                on_retry(&RetryNotice { attempt,
                                        delay_ms,
                                        error: e });
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            r => return r,
        }
    }
}
