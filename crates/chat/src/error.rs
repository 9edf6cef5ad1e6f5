//! Chat errors and their user-facing payloads.

use {
    serde_json::{Value, json},
    veritas_orchestrator::{ErrorKind, OrchestrationError, ResponseMeta},
};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("invalid chat settings: {0}")]
    InvalidSettings(String),

    #[error("{error}")]
    Orchestration {
        error: OrchestrationError,
        meta: ResponseMeta,
    },
}

impl ChatError {
    /// HTTP status a front end should answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::EmptyMessage => 400,
            Self::InvalidSettings(_) => 500,
            Self::Orchestration { error, .. } => error.http_status(),
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Orchestration { meta, .. } => Some(&meta.correlation_id),
            _ => None,
        }
    }

    /// Structured payload with `type`, `title`, `detail` and, for failed
    /// orchestrations, `correlationId`.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let (kind, title, detail) = match self {
            Self::EmptyMessage => ("empty_message", "Nothing to send", self.to_string()),
            Self::InvalidSettings(msg) => ("invalid_settings", "Configuration error", msg.clone()),
            Self::Orchestration { error, .. } => (
                error.kind.as_str(),
                title_for(error.kind),
                error.message.clone(),
            ),
        };
        let mut payload = json!({
            "type": kind,
            "title": title,
            "detail": detail,
        });
        if let Some(id) = self.correlation_id() {
            payload["correlationId"] = Value::String(id.to_string());
        }
        payload
    }
}

fn title_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Timeout => "Provider timed out",
        ErrorKind::RateLimit => "Rate limited",
        ErrorKind::Network => "Provider unreachable",
        ErrorKind::Auth => "Authentication error",
        ErrorKind::InvalidRequest => "Request rejected",
        ErrorKind::Validation => "Malformed answer",
        ErrorKind::CircuitOpen => "Providers unavailable",
        ErrorKind::Cancelled => "Cancelled",
        ErrorKind::Unknown => "Error",
    }
}
