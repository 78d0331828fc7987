use std::fmt;

/// Outcome classification for calls against either external system.
///
/// The retryable/non-retryable split drives [`crate::RetryPolicy`]:
/// transport faults and throttling are retried, client errors are surfaced
/// immediately so the affected record can be logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Non-2xx HTTP response.
    Status { code: u16, message: String },
    /// The per-operation deadline expired.
    Timeout,
    /// Connection-level failure (DNS, refused, reset).
    Connect(String),
    /// The response body did not match the expected shape.
    Decode(String),
    /// The CRM client does not support writes in this generation. The
    /// intended write has been journaled for later replay.
    WriteUnsupported,
    /// The caller's cancellation token fired, or the pacing queue shut down.
    Cancelled,
}

impl ApiError {
    /// Transient faults worth retrying: any 5xx, throttling (429),
    /// timeouts and connection errors. Authentication, authorization,
    /// not-found and validation failures (400/401/403/404) are definitive.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { code, .. } => *code >= 500 || *code == 429,
            ApiError::Timeout | ApiError::Connect(_) => true,
            ApiError::Decode(_) | ApiError::WriteUnsupported | ApiError::Cancelled => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// Map a reqwest failure into the taxonomy.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ApiError::Timeout;
        }
        if err.is_connect() {
            return ApiError::Connect(err.to_string());
        }
        if err.is_decode() {
            return ApiError::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return ApiError::Status {
                code: status.as_u16(),
                message: err.to_string(),
            };
        }
        ApiError::Connect(err.to_string())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Status { code, message } => write!(f, "http {code}: {message}"),
            ApiError::Timeout => write!(f, "operation deadline expired"),
            ApiError::Connect(msg) => write!(f, "connection failed: {msg}"),
            ApiError::Decode(msg) => write!(f, "response decode failed: {msg}"),
            ApiError::WriteUnsupported => {
                write!(f, "CRM writes are not supported; update was staged only")
            }
            ApiError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_xx_and_throttle_are_retryable() {
        for code in [500, 502, 503, 429] {
            let e = ApiError::Status {
                code,
                message: String::new(),
            };
            assert!(e.is_retryable(), "expected {code} retryable");
        }
    }

    #[test]
    fn client_errors_are_definitive() {
        for code in [400, 401, 403, 404] {
            let e = ApiError::Status {
                code,
                message: String::new(),
            };
            assert!(!e.is_retryable(), "expected {code} non-retryable");
        }
    }

    #[test]
    fn transport_faults_are_retryable() {
        assert!(ApiError::Timeout.is_retryable());
        assert!(ApiError::Connect("reset".into()).is_retryable());
        assert!(!ApiError::Decode("bad json".into()).is_retryable());
        assert!(!ApiError::Cancelled.is_retryable());
        assert!(!ApiError::WriteUnsupported.is_retryable());
    }
}
