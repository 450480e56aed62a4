//! Soporte de ejecución: reintentos, presupuesto de llamadas y cancelación.
mod budget;
mod cancel;
mod retry;

pub use budget::{BudgetPermit, RateBudget};
pub use cancel::CancellationFlag;
pub use retry::{call_with_retry, RetryNotice};
