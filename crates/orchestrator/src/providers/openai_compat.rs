//! Adapter for any OpenAI Chat Completions compatible endpoint
//! (OpenAI, OpenRouter, Mistral, Hugging Face router, Ollama).

use std::time::Duration;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, trace, warn},
};

use crate::{
    error::{ErrorKind, ProviderError},
    model::{ChatMessage, ProviderAdapter, ProviderReply, RequestOptions},
};

use super::{shared_http_client, status_error, strip_think_tags, transport_error};

pub struct OpenAiCompatAdapter {
    family: String,
    base_url: String,
    api_key: Option<Secret<String>>,
    supports_json_mode: bool,
    client: &'static reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(
        family: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<Secret<String>>,
    ) -> Self {
        Self {
            family: family.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            supports_json_mode: false,
            client: shared_http_client(),
        }
    }

    /// Request `response_format: json_object` whenever a schema is set.
    #[must_use]
    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.supports_json_mode = enabled;
        self
    }

    fn request_body(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages.iter().map(ChatMessage::to_openai_value).collect::<Vec<_>>(),
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = temperature.into();
        }
        if options.schema.is_some() && self.supports_json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn family(&self) -> &str {
        &self.family
    }

    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        let body = self.request_body(model, messages, options);

        debug!(
            provider = %self.family,
            model,
            messages_count = messages.len(),
            json_mode = body.get("response_format").is_some(),
            "chat completions request"
        );
        trace!(body = %body, "chat completions request body");

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .timeout(timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header(
                "Authorization",
                format!("Bearer {}", key.expose_secret()),
            );
        }

        let http_resp = req
            .send()
            .await
            .map_err(|e| transport_error(&e, timeout))?;

        if !http_resp.status().is_success() {
            let err = status_error(http_resp).await;
            warn!(
                provider = %self.family,
                model,
                kind = %err.kind,
                error = %err.message,
                "chat completions API error"
            );
            return Err(err);
        }

        let resp = http_resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| transport_error(&e, timeout))?;
        trace!(response = %resp, "chat completions raw response");

        let content = resp["choices"][0]["message"]["content"]
            .as_str()
            .map(strip_think_tags)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ProviderError::new(ErrorKind::Unknown, "response contained no message content")
            })?;

        Ok(ProviderReply::from_content(&content))
    }
}
