use std::fmt;

use lmr_net::ApiError;

/// Run-level error classification.
///
/// Record-level failures never surface as `RunError` — they are logged into
/// the run details and the batch continues. A `RunError` aborts its phase;
/// `Integrity` and `Storage` abort the whole run.
#[derive(Debug)]
pub enum RunError {
    /// A phase-level external call failed after retries.
    Api(ApiError),
    /// The Storage implementation failed.
    Storage(anyhow::Error),
    /// Pair configuration cannot be executed against the live schema.
    Config(String),
    /// A code path attempted a mutation the engine must never perform.
    /// Detected before any I/O is issued for the offending action.
    Integrity(String),
    /// The run's cancellation token fired.
    Cancelled,
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
            || matches!(self, RunError::Api(e) if e.is_cancelled())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Api(e) => write!(f, "external call failed: {e}"),
            RunError::Storage(e) => write!(f, "storage failed: {e}"),
            RunError::Config(msg) => write!(f, "configuration error: {msg}"),
            RunError::Integrity(msg) => write!(f, "integrity violation: {msg}"),
            RunError::Cancelled => write!(f, "run cancelled"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<ApiError> for RunError {
    fn from(e: ApiError) -> Self {
        if e.is_cancelled() {
            RunError::Cancelled
        } else {
            RunError::Api(e)
        }
    }
}

impl From<anyhow::Error> for RunError {
    fn from(e: anyhow::Error) -> Self {
        RunError::Storage(e)
    }
}
