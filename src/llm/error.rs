//! LLM error types with retry classification.
//!
//! Transient errors (rate limits, 5xx, network) are retried with backoff;
//! everything else fails the run immediately.

use std::time::Duration;

use thiserror::Error;

/// Classification of LLM errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Rate limited (429) - transient, should retry with backoff
    RateLimited,
    /// Server error (5xx) - transient, should retry
    ServerError,
    /// Client error (4xx except 429) - permanent
    ClientError,
    /// Connection failure or timeout - transient
    NetworkError,
    /// Unparseable response body - permanent
    ParseError,
}

impl LlmErrorKind {
    /// Check if this error kind is transient (should retry).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }

    fn label(&self) -> &'static str {
        match self {
            LlmErrorKind::RateLimited => "Rate limited",
            LlmErrorKind::ServerError => "Server error",
            LlmErrorKind::ClientError => "Client error",
            LlmErrorKind::NetworkError => "Network error",
            LlmErrorKind::ParseError => "Parse error",
        }
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Error from LLM API calls.
#[derive(Debug, Error)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    /// Delay requested by the server through `Retry-After`
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl LlmError {
    fn new(kind: LlmErrorKind, status_code: Option<u16>, message: String) -> Self {
        Self {
            kind,
            status_code,
            message,
            retry_after: None,
        }
    }

    /// Build an error from a non-success HTTP response.
    pub fn from_status(status_code: u16, body: String, retry_after: Option<Duration>) -> Self {
        let mut error = Self::new(classify_http_status(status_code), Some(status_code), body);
        error.retry_after = retry_after;
        error
    }

    pub fn network_error(message: String) -> Self {
        Self::new(LlmErrorKind::NetworkError, None, message)
    }

    pub fn parse_error(message: String) -> Self {
        Self::new(LlmErrorKind::ParseError, None, message)
    }

    /// Delay before retry `attempt` (0-based): `Retry-After` when given,
    /// otherwise exponential backoff capped at 60 seconds.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }
        let base_secs: u64 = match self.kind {
            LlmErrorKind::RateLimited => 5,
            LlmErrorKind::ServerError => 2,
            _ => 1,
        };
        let secs = base_secs.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_secs(secs.min(60))
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Maximum total time to spend retrying
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Whether attempt number `attempt` (0-based) may be retried after `error`.
    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.kind.is_transient() && attempt < self.max_retries
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(500), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(400), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(401), LlmErrorKind::ClientError);
    }

    #[test]
    fn test_retry_only_transient() {
        let config = RetryConfig::default();
        let server = LlmError::from_status(502, "bad gateway".into(), None);
        let client = LlmError::from_status(401, "no key".into(), None);
        assert!(config.should_retry(&server, 0));
        assert!(!config.should_retry(&server, 3));
        assert!(!config.should_retry(&client, 0));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let error = LlmError::from_status(429, "slow down".into(), None);
        assert!(error.suggested_delay(1) > error.suggested_delay(0));
        assert_eq!(error.suggested_delay(10), Duration::from_secs(60));

        let error = LlmError::from_status(429, "slow down".into(), Some(Duration::from_secs(30)));
        assert_eq!(error.suggested_delay(4), Duration::from_secs(30));
    }

    #[test]
    fn test_display_includes_status() {
        let error = LlmError::from_status(500, "oops".into(), None);
        assert_eq!(error.to_string(), "Server error (HTTP 500): oops");
        let error = LlmError::network_error("refused".into());
        assert_eq!(error.to_string(), "Network error: refused");
    }
}
