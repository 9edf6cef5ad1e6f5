use std::{fmt, str::FromStr, time::Duration};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::{error::ProviderError, output::OutputSchema};

// ── Conversation messages ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One entry of a conversation. Order within a history is chronological.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// OpenAI Chat Completions message object.
    #[must_use]
    pub fn to_openai_value(&self) -> serde_json::Value {
        serde_json::json!({ "role": self.role.as_str(), "content": self.content })
    }
}

// ── Request options ─────────────────────────────────────────────────────────

/// Knowledge layer a turn is aimed at. Only affects prompt framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Depth {
    #[default]
    Surface,
    Deep,
    Dark,
    Vault,
}

impl Depth {
    pub const ALL: [Depth; 4] = [Self::Surface, Self::Deep, Self::Dark, Self::Vault];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Surface => "SURFACE",
            Self::Deep => "DEEP",
            Self::Dark => "DARK",
            Self::Vault => "VAULT",
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Depth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == upper)
            .ok_or_else(|| format!("unknown depth \"{s}\" (expected SURFACE, DEEP, DARK or VAULT)"))
    }
}

/// Per-call options handed to the orchestrator and on to every adapter.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// When set, every reply must validate against this schema.
    pub schema: Option<OutputSchema>,
    pub depth: Option<Depth>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl RequestOptions {
    #[must_use]
    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = Some(depth);
        self
    }
}

// ── Provider replies ────────────────────────────────────────────────────────

/// A provider's final answer, normalised across families.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    Text(String),
    Structured(serde_json::Value),
}

impl ProviderReply {
    /// Normalise raw model output: a JSON object (optionally inside a
    /// Markdown code fence) becomes `Structured`, anything else stays text.
    #[must_use]
    pub fn from_content(content: &str) -> Self {
        let candidate = strip_code_fence(content.trim());
        match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(value @ serde_json::Value::Object(_)) => Self::Structured(value),
            _ => Self::Text(content.to_string()),
        }
    }

    /// Payload handed back to callers: the object itself or `{ "text": ... }`.
    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        match self {
            Self::Text(text) => serde_json::json!({ "text": text }),
            Self::Structured(value) => value,
        }
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

// ── Provider adapter interface ──────────────────────────────────────────────

/// Uniform interface over one model family (OpenAI-compatible, Anthropic, ...).
///
/// Adapters must not panic or bubble transport errors: every failure is a
/// [`ProviderError`] carrying its kind and whether a retry may help.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Family key this adapter is registered under (the part before `/`).
    fn family(&self) -> &str;

    /// Send `messages` to `model` and return its normalised reply.
    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let msg = ChatMessage::assistant("hi");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({ "role": "assistant", "content": "hi" })
        );
        assert_eq!(msg.to_openai_value()["role"], "assistant");
    }

    #[test]
    fn depth_parses_case_insensitively() {
        assert_eq!("deep".parse::<Depth>().unwrap(), Depth::Deep);
        assert_eq!(" VAULT ".parse::<Depth>().unwrap(), Depth::Vault);
        assert!("abyss".parse::<Depth>().is_err());
        assert_eq!(serde_json::to_value(Depth::Dark).unwrap(), "DARK");
    }

    #[test]
    fn json_object_content_is_structured() {
        let reply = ProviderReply::from_content(r#"{"content": "x", "citations": []}"#);
        assert!(matches!(reply, ProviderReply::Structured(_)));
    }

    #[test]
    fn fenced_json_is_structured() {
        let reply = ProviderReply::from_content("```json\n{\"content\": \"x\"}\n```");
        assert_eq!(
            reply,
            ProviderReply::Structured(serde_json::json!({ "content": "x" }))
        );
    }

    #[test]
    fn non_object_json_stays_text() {
        assert_eq!(
            ProviderReply::from_content("42"),
            ProviderReply::Text("42".into())
        );
        assert_eq!(
            ProviderReply::from_content("**Finding**: none"),
            ProviderReply::Text("**Finding**: none".into())
        );
    }

    #[test]
    fn text_reply_wraps_into_object() {
        assert_eq!(
            ProviderReply::Text("hello".into()).into_value(),
            serde_json::json!({ "text": "hello" })
        );
    }
}
