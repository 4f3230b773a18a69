use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a failure should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Upstream throttled us and kept doing so through every retry.
    RateLimited,
    /// Network trouble or 5xx, retried and still failing.
    Transient,
    /// Not worth retrying within this run.
    Fatal,
}

/// Errors produced by the fetch-retry engine.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Still throttled after the retry budget was spent.
    #[error("rate limited (HTTP 429 Too Many Requests) after {attempts} attempt(s): {url}")]
    RateLimited { url: String, attempts: u32 },

    /// Network failure or server error after the retry budget was spent.
    #[error("transient failure after {attempts} attempt(s) for {url}: {message}")]
    Transient {
        url: String,
        attempts: u32,
        message: String,
    },

    /// Non-retryable HTTP status.
    #[error("HTTP {status} for {url}")]
    Http { url: String, status: u16 },

    /// The response could not be used.
    #[error("malformed response from {url}: {message}")]
    Malformed { url: String, message: String },

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::Transient { .. } => FailureKind::Transient,
            FetchError::Http { .. } | FetchError::Malformed { .. } | FetchError::Client(_) => {
                FailureKind::Fatal
            }
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    /// 404/410: the resource is gone upstream.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Http { status: 404 | 410, .. })
    }
}

/// Whether an error message already describes an HTTP 429.
pub fn message_indicates_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
}
