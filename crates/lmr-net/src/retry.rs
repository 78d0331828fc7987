use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ApiError;

/// Exponential backoff around a retryable operation.
///
/// Attempt `n` (zero-based) that fails with a retryable [`ApiError`] waits
/// `base_delay * 2^n` before the next try. Non-retryable errors and
/// cancellation short-circuit immediately; cancellation also aborts a wait
/// already in progress.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ApiError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_retries => {
                    debug!(attempts = attempt + 1, error = %e, "retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.base_delay * 2u32.pow(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}
