//! Structured output validation against a caller-supplied JSON Schema.

use std::{fmt, sync::Arc};

use {
    jsonschema::{ValidationError, Validator},
    serde_json::Value,
};

use crate::{
    error::{ConfigError, ProviderError},
    model::ProviderReply,
};

/// A compiled JSON Schema. Cheap to clone.
#[derive(Clone)]
pub struct OutputSchema {
    raw: Arc<Value>,
    compiled: Arc<Validator>,
}

impl OutputSchema {
    pub fn new(schema: Value) -> Result<Self, ConfigError> {
        let compiled =
            Validator::new(&schema).map_err(|e| ConfigError::InvalidSchema(e.to_string()))?;
        Ok(Self {
            raw: Arc::new(schema),
            compiled: Arc::new(compiled),
        })
    }

    /// The schema document, for adapters that forward it to the provider.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Accept a reply if it matches the schema.
    ///
    /// Text replies are checked in their `{ "text": ... }` form, so a schema
    /// that expects an object with other required fields rejects them.
    pub fn validate(&self, reply: ProviderReply) -> Result<Value, ProviderError> {
        let value = reply.into_value();
        if let Err(errors) = self.compiled.validate(&value) {
            let messages: Vec<String> = errors.map(|e| format_validation_error(&e)).collect();
            return Err(ProviderError::validation(format!(
                "reply does not match schema: {}",
                messages.join("; ")
            )));
        }
        Ok(value)
    }
}

fn format_validation_error(error: &ValidationError) -> String {
    let path = error.instance_path.to_string();
    if path.is_empty() {
        error.to_string()
    } else {
        format!("{path}: {error}")
    }
}

impl fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSchema").field("raw", &self.raw).finish()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::error::ErrorKind, serde_json::json};

    fn answer_schema() -> OutputSchema {
        OutputSchema::new(json!({
            "type": "object",
            "required": ["content"],
            "properties": {
                "content": { "type": "string" },
                "citations": { "type": "array", "items": { "type": "string" } }
            }
        }))
        .unwrap()
    }

    #[test]
    fn accepts_matching_object() {
        let value = answer_schema()
            .validate(ProviderReply::Structured(
                json!({ "content": "ok", "citations": ["https://a.example"] }),
            ))
            .unwrap();
        assert_eq!(value["content"], "ok");
    }

    #[test]
    fn rejects_wrong_types_with_path() {
        let err = answer_schema()
            .validate(ProviderReply::Structured(
                json!({ "content": "ok", "citations": [1] }),
            ))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.retryable);
        assert!(err.message.contains("/citations/0"), "{}", err.message);
    }

    #[test]
    fn rejects_plain_text_reply() {
        let err = answer_schema()
            .validate(ProviderReply::Text("just prose".into()))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("content"));
    }

    #[test]
    fn text_reply_passes_text_schema() {
        let schema = OutputSchema::new(json!({
            "type": "object",
            "required": ["text"]
        }))
        .unwrap();
        assert!(schema.validate(ProviderReply::Text("hi".into())).is_ok());
    }

    #[test]
    fn invalid_schema_is_config_error() {
        let err = OutputSchema::new(json!({ "type": "not-a-type" })).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSchema(_)));
    }
}
