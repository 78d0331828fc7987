//! Rate-limited, retry-aware I/O plumbing shared by both external-system
//! clients.
//!
//! This crate owns the error taxonomy for outbound calls ([`ApiError`]),
//! the per-system pacing gate ([`RateLimiter`]), the backoff loop
//! ([`RetryPolicy`]) and the per-operation deadline helper
//! ([`with_deadline`]). It knows nothing about either system's wire format.

mod error;
mod limiter;
mod retry;

pub use error::ApiError;
pub use limiter::RateLimiter;
pub use retry::RetryPolicy;

use std::future::Future;
use std::time::Duration;

/// Per-operation-class deadlines carried by both system clients.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    /// Whole-collection operations: list lists, query database.
    pub list_ops: Duration,
    /// Single-record operations: create/update/archive page, fetch entity.
    pub record_ops: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            list_ops: Duration::from_secs(60),
            record_ops: Duration::from_secs(20),
        }
    }
}

/// Bound a call with a deadline. Expiry surfaces as [`ApiError::Timeout`],
/// which is retryable.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(ApiError::Timeout),
    }
}
