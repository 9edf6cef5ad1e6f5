use std::time::Duration;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, trace, warn},
};

use crate::{
    error::{ErrorKind, ProviderError},
    model::{ChatMessage, ProviderAdapter, ProviderReply, RequestOptions, Role},
};

use super::{shared_http_client, status_error, strip_think_tags, transport_error};

/// The Messages API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Native Anthropic Messages API adapter.
pub struct AnthropicAdapter {
    api_key: Secret<String>,
    base_url: String,
    client: &'static reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(api_key: Secret<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: shared_http_client(),
        }
    }
}

/// Hoist system messages into the separate `system` field.
fn to_anthropic_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<serde_json::Value>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let rest = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(ChatMessage::to_openai_value)
        .collect();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, rest)
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn family(&self) -> &str {
        "anthropic"
    }

    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        let (system_text, anthropic_messages) = to_anthropic_messages(messages);

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": anthropic_messages,
        });
        if let Some(ref sys) = system_text {
            body["system"] = serde_json::Value::String(sys.clone());
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = temperature.into();
        }

        debug!(
            model,
            messages_count = anthropic_messages.len(),
            has_system = system_text.is_some(),
            "anthropic messages request"
        );
        trace!(body = %body, "anthropic request body");

        let http_resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e, timeout))?;

        if !http_resp.status().is_success() {
            let err = status_error(http_resp).await;
            warn!(model, kind = %err.kind, error = %err.message, "anthropic API error");
            return Err(err);
        }

        let resp = http_resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| transport_error(&e, timeout))?;
        trace!(response = %resp, "anthropic raw response");

        let text = resp["content"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|b| b["type"].as_str() == Some("text"))
            .filter_map(|b| b["text"].as_str())
            .collect::<String>();
        let text = strip_think_tags(&text);
        if text.is_empty() {
            return Err(ProviderError::new(
                ErrorKind::Unknown,
                "response contained no text blocks",
            ));
        }

        Ok(ProviderReply::from_content(&text))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use {
        axum::{Json, Router, http::StatusCode, routing::post},
        serde_json::json,
    };

    use super::*;

    type Captured = Arc<Mutex<Vec<(axum::http::HeaderMap, serde_json::Value)>>>;

    async fn start_mock(status: StatusCode, reply: serde_json::Value) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let cap = Arc::clone(&captured);
        let app = Router::new().route(
            "/v1/messages",
            post(
                move |headers: axum::http::HeaderMap, Json(body): Json<serde_json::Value>| {
                    let cap = Arc::clone(&cap);
                    let reply = reply.clone();
                    async move {
                        cap.lock().unwrap().push((headers, body));
                        (status, Json(reply))
                    }
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), captured)
    }

    #[test]
    fn system_messages_are_hoisted() {
        let (system, rest) = to_anthropic_messages(&[
            ChatMessage::system("a"),
            ChatMessage::user("q1"),
            ChatMessage::assistant("r1"),
            ChatMessage::system("b"),
            ChatMessage::user("q2"),
        ]);
        assert_eq!(system.as_deref(), Some("a\n\nb"));
        let roles: Vec<_> = rest.iter().map(|m| m["role"].clone()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
    }

    #[tokio::test]
    async fn sends_native_request_and_joins_text_blocks() {
        let (base, captured) = start_mock(
            StatusCode::OK,
            json!({
                "content": [
                    { "type": "text", "text": "Part one. " },
                    { "type": "tool_use", "id": "t1", "name": "x", "input": {} },
                    { "type": "text", "text": "Part two." }
                ],
                "usage": { "input_tokens": 12, "output_tokens": 4 }
            }),
        )
        .await;
        let adapter = AnthropicAdapter::new(Secret::new("sk-ant".into()), base);
        let reply = adapter
            .call(
                "claude-sonnet-4-20250514",
                &[ChatMessage::system("sys"), ChatMessage::user("hi")],
                &RequestOptions::default(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(reply, ProviderReply::Text("Part one. Part two.".into()));

        let reqs = captured.lock().unwrap();
        let (headers, body) = &reqs[0];
        assert_eq!(headers["x-api-key"], "sk-ant");
        assert_eq!(headers["anthropic-version"], "2023-06-01");
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"], json!([{ "role": "user", "content": "hi" }]));
    }

    #[tokio::test]
    async fn overloaded_maps_to_network() {
        let (base, _) = start_mock(
            StatusCode::from_u16(529).unwrap(),
            json!({ "type": "error", "error": { "type": "overloaded_error" } }),
        )
        .await;
        let adapter = AnthropicAdapter::new(Secret::new("k".into()), base);
        let err = adapter
            .call(
                "claude-3-5-haiku-latest",
                &[ChatMessage::user("hi")],
                &RequestOptions::default(),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retryable() {
        let (base, _) = start_mock(
            StatusCode::UNAUTHORIZED,
            json!({ "type": "error", "error": { "type": "authentication_error" } }),
        )
        .await;
        let adapter = AnthropicAdapter::new(Secret::new("bad".into()), base);
        let err = adapter
            .call(
                "claude-3-5-haiku-latest",
                &[ChatMessage::user("hi")],
                &RequestOptions::default(),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(!err.retryable);
    }
}
