use std::{sync::Arc, time::Duration};

use {
    serde::Serialize,
    tracing::{debug, info, warn},
    veritas_config::ChatConfig,
    veritas_orchestrator::{
        CancellationToken, ChatMessage, Depth, Orchestrator, OutputSchema, RequestOptions,
        ResponseMeta,
    },
};

#[cfg(feature = "metrics")]
use veritas_metrics::{chat as chat_metrics, counter, labels};

use crate::{
    citations::{dedupe_citations, extract_citations},
    context::{ContextSource, sources_from_names},
    conversation::Conversation,
    error::ChatError,
    prompt::{VERITAS_PROMPT, system_prompt, with_context},
    structured::{StructuredAnswer, answer_schema},
};

/// Validated chat settings.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub system_prompt: String,
    /// Most recent messages (the new one included) sent per turn.
    pub history_window: Option<usize>,
    pub structured_output: bool,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub default_depth: Depth,
    /// Built-in context sources consulted before each turn.
    pub context_sources: Vec<String>,
    /// Time budget per context source.
    pub context_timeout: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            system_prompt: VERITAS_PROMPT.to_string(),
            history_window: None,
            structured_output: true,
            max_tokens: 800,
            temperature: None,
            default_depth: Depth::Surface,
            context_sources: Vec::new(),
            context_timeout: Duration::from_secs(8),
        }
    }
}

impl TryFrom<&ChatConfig> for ChatSettings {
    type Error = ChatError;

    fn try_from(cfg: &ChatConfig) -> Result<Self, Self::Error> {
        if cfg.history_window == Some(0) {
            return Err(ChatError::InvalidSettings(
                "history_window must be at least 1".into(),
            ));
        }
        if cfg.max_tokens == 0 {
            return Err(ChatError::InvalidSettings(
                "max_tokens must be at least 1".into(),
            ));
        }
        if !cfg.context_sources.is_empty() && cfg.context_timeout_ms == 0 {
            return Err(ChatError::InvalidSettings(
                "context_timeout_ms must be at least 1".into(),
            ));
        }
        let default_depth = cfg
            .default_depth
            .parse::<Depth>()
            .map_err(ChatError::InvalidSettings)?;
        let system_prompt = cfg
            .system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(VERITAS_PROMPT)
            .to_string();
        Ok(Self {
            system_prompt,
            history_window: cfg.history_window,
            structured_output: cfg.structured_output,
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            default_depth,
            context_sources: cfg.context_sources.clone(),
            context_timeout: Duration::from_millis(cfg.context_timeout_ms),
        })
    }
}

/// A successful turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub content: String,
    pub citations: Vec<String>,
    pub depth: Depth,
    pub meta: ResponseMeta,
}

/// Runs chat turns through a shared orchestrator.
pub struct ChatService {
    orchestrator: Arc<Orchestrator>,
    settings: ChatSettings,
    schema: Option<OutputSchema>,
    context: Vec<Arc<dyn ContextSource>>,
}

impl ChatService {
    /// Build the service, including the context sources named in `settings`.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        settings: ChatSettings,
    ) -> Result<Self, ChatError> {
        let schema = if settings.structured_output {
            Some(
                OutputSchema::new(answer_schema())
                    .map_err(|e| ChatError::InvalidSettings(e.to_string()))?,
            )
        } else {
            None
        };
        let context = sources_from_names(&settings.context_sources, settings.context_timeout)
            .map_err(|e| ChatError::InvalidSettings(e.to_string()))?;
        Ok(Self {
            orchestrator,
            settings,
            schema,
            context,
        })
    }

    /// Register an extra context source, consulted after the configured ones.
    #[must_use]
    pub fn with_context_source(mut self, source: Arc<dyn ContextSource>) -> Self {
        self.context.push(source);
        self
    }

    /// Names of the registered context sources, in consultation order.
    pub fn context_sources(&self) -> Vec<&str> {
        self.context.iter().map(|s| s.name()).collect()
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Send one user turn.
    ///
    /// The user message is appended before the call and stays in history even
    /// when the call fails; the assistant reply is appended only on success.
    pub async fn send(
        &self,
        conversation: &mut Conversation,
        text: &str,
        depth: Option<Depth>,
        cancel: &CancellationToken,
    ) -> Result<ChatReply, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let depth = depth.unwrap_or(self.settings.default_depth);

        conversation.push_user(text);

        let context = self.gather_context(text, depth, cancel).await;
        let system = with_context(
            system_prompt(
                &self.settings.system_prompt,
                depth,
                self.settings.structured_output,
            ),
            &context,
        );

        let history = conversation.window(self.settings.history_window);
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend_from_slice(history);

        let options = RequestOptions {
            schema: self.schema.clone(),
            depth: Some(depth),
            max_tokens: Some(self.settings.max_tokens),
            temperature: self.settings.temperature,
        };

        debug!(
            conversation = conversation.id(),
            depth = %depth,
            history = history.len(),
            context_blocks = context.len(),
            "sending chat turn"
        );

        let (outcome, meta) = self
            .orchestrator
            .orchestrate_with_cancel(&messages, &options, cancel)
            .await
            .into_parts();

        match outcome {
            Ok(data) => {
                let answer = StructuredAnswer::from_value(data);
                let extracted = extract_citations(&answer.content);
                let citations = dedupe_citations(answer.citations.into_iter().chain(extracted));

                conversation.push_assistant(answer.content.clone());
                info!(
                    conversation = conversation.id(),
                    correlation_id = %meta.correlation_id,
                    citations = citations.len(),
                    "chat turn answered"
                );
                #[cfg(feature = "metrics")]
                {
                    counter!(
                        chat_metrics::TURNS_TOTAL,
                        labels::SUCCESS => "true",
                        labels::DEPTH => depth.as_str()
                    )
                    .increment(1);
                    counter!(chat_metrics::CITATIONS_TOTAL).increment(citations.len() as u64);
                }

                Ok(ChatReply {
                    content: answer.content,
                    citations,
                    depth,
                    meta,
                })
            },
            Err(error) => {
                warn!(
                    conversation = conversation.id(),
                    correlation_id = %meta.correlation_id,
                    kind = %error.kind,
                    "chat turn failed"
                );
                #[cfg(feature = "metrics")]
                counter!(
                    chat_metrics::TURNS_TOTAL,
                    labels::SUCCESS => "false",
                    labels::DEPTH => depth.as_str()
                )
                .increment(1);
                Err(ChatError::Orchestration { error, meta })
            },
        }
    }

    /// Ask every context source in turn. Failures and timeouts are logged and
    /// skipped; cancellation stops gathering early.
    async fn gather_context(
        &self,
        query: &str,
        depth: Depth,
        cancel: &CancellationToken,
    ) -> Vec<(String, String)> {
        let mut blocks = Vec::new();
        for source in &self.context {
            let gathered = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                r = tokio::time::timeout(
                    self.settings.context_timeout,
                    source.gather(query, depth),
                ) => Some(r),
            };
            let Some(gathered) = gathered else {
                debug!("turn cancelled while gathering context");
                break;
            };

            let failure = match gathered {
                Ok(Ok(text)) => {
                    debug!(source = source.name(), bytes = text.len(), "context gathered");
                    blocks.push((source.name().to_string(), text));
                    continue;
                },
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "no answer within {}ms",
                    self.settings.context_timeout.as_millis()
                ),
            };
            warn!(
                source = source.name(),
                error = %failure,
                "context source failed, continuing without it"
            );
            #[cfg(feature = "metrics")]
            counter!(
                chat_metrics::CONTEXT_ERRORS_TOTAL,
                labels::SOURCE => source.name().to_string()
            )
            .increment(1);
        }
        blocks
    }
}
