use {
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
};

/// JSON Schema for `{ content, citations? }` answers.
#[must_use]
pub fn answer_schema() -> Value {
    json!({
        "type": "object",
        "required": ["content"],
        "properties": {
            "content": { "type": "string" },
            "citations": {
                "type": "array",
                "items": { "type": "string" }
            }
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    pub content: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

impl StructuredAnswer {
    /// Read an orchestration payload. Accepts the structured shape, a plain
    /// `{ "text": ... }` reply, or any other object (rendered as JSON).
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        if let Ok(answer) = serde_json::from_value::<Self>(value.clone()) {
            return answer;
        }
        let content = match value.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => serde_json::to_string_pretty(&value).unwrap_or_default(),
        };
        Self {
            content,
            citations: Vec::new(),
        }
    }
}
