// Error taxonomy shared by every component of the resilience layer.
// ApiError is Clone so that one failed execution can be handed to every coalesced caller.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Rate limit exceeded for {scope}, retry in {retry_after_ms}ms")]
    RateLimitExceeded { scope: String, retry_after_ms: u64 },

    #[error("Circuit breaker open for {service}")]
    CircuitOpen {
        service: String,
        retry_after_ms: Option<u64>,
    },

    #[error("API error: {status_code} - {message}")]
    ApiResponseError { status_code: u16, message: String },

    #[error("Malformed upstream response: {0}")]
    Decode(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by the retry policy and by callers deciding
/// between a retry affordance and a degraded fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimitExceeded,
    CircuitOpen,
    Transient,
    Permanent,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            ApiError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ApiError::Network(_) | ApiError::Timeout(_) => ErrorKind::Transient,
            ApiError::ApiResponseError { status_code, .. } => {
                if matches!(status_code, 429 | 502 | 503 | 504) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            }
            ApiError::Decode(_) | ApiError::Internal(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        for status_code in [429, 502, 503, 504] {
            let err = ApiError::ApiResponseError {
                status_code,
                message: String::new(),
            };
            assert!(err.is_retryable(), "{status_code} should be retryable");
        }

        for status_code in [400, 401, 404, 500] {
            let err = ApiError::ApiResponseError {
                status_code,
                message: String::new(),
            };
            assert_eq!(err.kind(), ErrorKind::Permanent);
        }
    }

    #[test]
    fn test_synthetic_errors_are_never_retried() {
        let limited = ApiError::RateLimitExceeded {
            scope: "tours-api".to_string(),
            retry_after_ms: 1200,
        };
        let open = ApiError::CircuitOpen {
            service: "tours-api".to_string(),
            retry_after_ms: None,
        };

        assert!(!limited.is_retryable());
        assert!(!open.is_retryable());
        assert!(ApiError::Network("connection reset".into()).is_retryable());
        assert!(ApiError::Timeout(10_000).is_retryable());
        assert!(!ApiError::Decode("expected value".into()).is_retryable());
    }
}
