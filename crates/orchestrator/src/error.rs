use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a failed provider call or orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Provider did not answer within the per-call timeout.
    Timeout,
    /// 429 or quota text.
    RateLimit,
    /// Connection failures and 5xx responses.
    Network,
    /// 401/403.
    Auth,
    /// 400/404/422, context window overflow. Fails the same way on a retry.
    InvalidRequest,
    /// Reply did not match the requested schema.
    Validation,
    /// Breaker blocked the remaining candidates.
    CircuitOpen,
    /// Caller abandoned the call.
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Default retryability of a failure of this kind.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimit | Self::Network | Self::Validation | Self::Unknown
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::RateLimit => "RATE_LIMIT",
            Self::Network => "NETWORK",
            Self::Auth => "AUTH",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Validation => "VALIDATION",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed attempt against one model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    /// Error of `kind` with the kind's default retryability.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("no response within {}ms", after.as_millis()),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled")
    }

    /// Build from a non-2xx provider response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = classify_status(status).unwrap_or_else(|| classify_message(body));
        Self::new(kind, format!("HTTP {status}: {}", truncate(body.trim(), 500)))
    }

    /// Build from an unstructured error message (SDK text, transport text).
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(classify_message(&message), message)
    }
}

/// Classify an HTTP status code, or `None` when the code says nothing useful.
#[must_use]
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        408 => Some(ErrorKind::Timeout),
        429 => Some(ErrorKind::RateLimit),
        401 | 403 => Some(ErrorKind::Auth),
        400 | 404 | 413 | 422 => Some(ErrorKind::InvalidRequest),
        500..=599 => Some(ErrorKind::Network),
        _ => None,
    }
}

/// Error patterns for context window overflow.
const CONTEXT_WINDOW_PATTERNS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "context window",
    "too many tokens",
    "request too large",
    "request_too_large",
    "content_too_large",
];

/// Classify an error message by pattern.
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    let msg = message.to_lowercase();

    // Context window first: "request too large" overlaps with 413 handling.
    if CONTEXT_WINDOW_PATTERNS.iter().any(|p| msg.contains(p)) {
        return ErrorKind::InvalidRequest;
    }

    if msg.contains("timed out") || msg.contains("timeout") || msg.contains("deadline") {
        return ErrorKind::Timeout;
    }

    if msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("rate_limit")
        || msg.contains("too many requests")
        || msg.contains("quota")
    {
        return ErrorKind::RateLimit;
    }

    if msg.contains("401")
        || msg.contains("403")
        || msg.contains("unauthorized")
        || msg.contains("forbidden")
        || msg.contains("invalid api key")
        || msg.contains("invalid_api_key")
        || msg.contains("authentication")
    {
        return ErrorKind::Auth;
    }

    if msg.contains("500")
        || msg.contains("502")
        || msg.contains("503")
        || msg.contains("504")
        || msg.contains("internal server error")
        || msg.contains("bad gateway")
        || msg.contains("service unavailable")
        || msg.contains("overloaded")
        || msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("error sending request")
    {
        return ErrorKind::Network;
    }

    if msg.contains("400") || msg.contains("bad request") || msg.contains("invalid_request") {
        return ErrorKind::InvalidRequest;
    }

    ErrorKind::Unknown
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Final failure of an orchestration call, surfaced as `{ type, message }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct OrchestrationError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
}

impl OrchestrationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// HTTP status a front end should answer with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.kind {
            ErrorKind::Timeout => 504,
            ErrorKind::RateLimit | ErrorKind::CircuitOpen => 503,
            ErrorKind::Cancelled => 499,
            _ => 502,
        }
    }
}

impl From<ProviderError> for OrchestrationError {
    fn from(err: ProviderError) -> Self {
        Self::new(err.kind, err.message)
    }
}

/// Rejected orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be at least {min}, got {value}")]
    TooSmall {
        field: &'static str,
        min: u64,
        value: u64,
    },
    #[error("max_delay_ms ({max}) must not be below base_delay_ms ({base})")]
    DelayRange { base: u64, max: u64 },
    #[error("model list is empty")]
    NoModels,
    #[error("invalid output schema: {0}")]
    InvalidSchema(String),
}
