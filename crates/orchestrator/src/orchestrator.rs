//! The request orchestrator: walks the model chain in order, gates each model
//! on its breaker, retries within a model, validates replies and returns one
//! uniform result.

use std::{collections::HashMap, time::Duration};

use {
    serde::Serialize,
    serde_json::Value,
    tokio::time::Instant,
    tokio_util::sync::CancellationToken,
    tracing::{Instrument, debug, info, info_span, warn},
};

#[cfg(feature = "metrics")]
use veritas_metrics::{
    breaker as breaker_metrics, counter, gauge, histogram, labels, llm, orchestration,
};

use crate::{
    breaker::{BreakerConfig, CircuitBreaker, CircuitState},
    error::{ConfigError, ErrorKind, OrchestrationError, ProviderError},
    model::{ChatMessage, ProviderAdapter, RequestOptions},
    providers::ProviderRegistry,
    retry::{RetryPolicy, run_with_retry},
};

// ── Settings ────────────────────────────────────────────────────────────────

/// Validated, immutable orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    models: Vec<String>,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: BreakerConfig,
}

impl OrchestratorSettings {
    pub fn new(
        models: Vec<String>,
        timeout: Duration,
        retry: RetryPolicy,
        breaker: BreakerConfig,
    ) -> Result<Self, ConfigError> {
        if models.is_empty() {
            return Err(ConfigError::NoModels);
        }
        if timeout.is_zero() {
            return Err(ConfigError::TooSmall {
                field: "timeout_ms",
                min: 1,
                value: 0,
            });
        }
        Ok(Self {
            models,
            timeout,
            retry,
            breaker,
        })
    }

    /// Model ids in priority order.
    #[must_use]
    pub fn models(&self) -> &[String] {
        &self.models
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    #[must_use]
    pub fn breaker(&self) -> &BreakerConfig {
        &self.breaker
    }
}

impl TryFrom<&veritas_config::OrchestratorConfig> for OrchestratorSettings {
    type Error = ConfigError;

    fn try_from(cfg: &veritas_config::OrchestratorConfig) -> Result<Self, Self::Error> {
        let retry = RetryPolicy::new(
            cfg.retry.max_attempts,
            Duration::from_millis(cfg.retry.base_delay_ms),
            Duration::from_millis(cfg.retry.max_delay_ms),
        )?;
        let breaker = BreakerConfig::new(
            cfg.breaker.failure_threshold,
            Duration::from_millis(cfg.breaker.reset_time_ms),
        )?;
        Self::new(
            cfg.models.clone(),
            Duration::from_millis(cfg.timeout_ms),
            retry,
            breaker,
        )
    }
}

// ── Result ──────────────────────────────────────────────────────────────────

/// Observability data attached to every orchestration result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub correlation_id: String,
    /// Model that answered, or the last model actually tried.
    pub model_used: Option<String>,
    /// Attempts spent on `model_used`, not summed across models.
    pub attempts: u32,
    pub total_latency_ms: u64,
}

/// Outcome of one orchestration call. Exactly one of `data` / `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<OrchestrationError>,
    meta: ResponseMeta,
}

impl OrchestrationResult {
    pub fn succeeded(data: Value, meta: ResponseMeta) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta,
        }
    }

    pub fn failed(error: OrchestrationError, meta: ResponseMeta) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            meta,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&OrchestrationError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    /// Split into the payload or the error, keeping the meta.
    pub fn into_parts(self) -> (Result<Value, OrchestrationError>, ResponseMeta) {
        let outcome = match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => Err(OrchestrationError::new(ErrorKind::Unknown, "empty result")),
        };
        (outcome, self.meta)
    }
}

// ── Orchestrator ────────────────────────────────────────────────────────────

/// Shared across concurrent calls (wrap in `Arc`); breaker state is learned
/// globally.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    registry: ProviderRegistry,
    breakers: HashMap<String, CircuitBreaker>,
}

impl Orchestrator {
    pub fn new(settings: OrchestratorSettings, registry: ProviderRegistry) -> Self {
        let breakers = settings
            .models
            .iter()
            .map(|id| (id.clone(), CircuitBreaker::new(id.clone(), settings.breaker)))
            .collect();
        Self {
            settings,
            registry,
            breakers,
        }
    }

    /// Build settings and the built-in provider registry from a loaded config.
    pub fn from_config(config: &veritas_config::VeritasConfig) -> Result<Self, ConfigError> {
        let settings = OrchestratorSettings::try_from(&config.orchestrator)?;
        let registry = ProviderRegistry::from_config(&config.providers);
        Ok(Self::new(settings, registry))
    }

    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Breaker state per configured model, in priority order.
    pub fn breaker_states(&self) -> Vec<(String, CircuitState)> {
        self.settings
            .models
            .iter()
            .filter_map(|id| self.breakers.get(id).map(|b| (id.clone(), b.state())))
            .collect()
    }

    pub fn breaker(&self, model_id: &str) -> Option<&CircuitBreaker> {
        self.breakers.get(model_id)
    }

    pub async fn orchestrate(
        &self,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> OrchestrationResult {
        self.orchestrate_with_cancel(messages, options, &CancellationToken::new())
            .await
    }

    /// Like [`Self::orchestrate`]; cancelling `cancel` stops the in-flight
    /// call or backoff and yields `CANCELLED`.
    pub async fn orchestrate_with_cancel(
        &self,
        messages: &[ChatMessage],
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> OrchestrationResult {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("orchestrate", correlation_id = %correlation_id);
        self.run(correlation_id, messages, options, cancel)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        correlation_id: String,
        messages: &[ChatMessage],
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> OrchestrationResult {
        let start = Instant::now();
        let total = self.settings.models.len();
        let mut last_error: Option<ProviderError> = None;
        let mut last_model: Option<String> = None;
        let mut last_attempts = 0;
        let mut breaker_skips = 0usize;

        debug!(
            models = total,
            messages = messages.len(),
            structured = options.schema.is_some(),
            depth = ?options.depth,
            "orchestration started"
        );

        let finish = |outcome: Result<Value, OrchestrationError>,
                      model_used: Option<String>,
                      attempts: u32| {
            let meta = ResponseMeta {
                correlation_id: correlation_id.clone(),
                model_used,
                attempts,
                total_latency_ms: start.elapsed().as_millis() as u64,
            };
            #[cfg(feature = "metrics")]
            {
                counter!(
                    orchestration::CALLS_TOTAL,
                    labels::SUCCESS => if outcome.is_ok() { "true" } else { "false" }
                )
                .increment(1);
                histogram!(orchestration::ATTEMPTS).record(f64::from(attempts));
                histogram!(orchestration::DURATION_SECONDS)
                    .record(start.elapsed().as_secs_f64());
            }
            match outcome {
                Ok(data) => {
                    info!(
                        model = meta.model_used.as_deref().unwrap_or_default(),
                        attempts,
                        latency_ms = meta.total_latency_ms,
                        "orchestration succeeded"
                    );
                    OrchestrationResult::succeeded(data, meta)
                },
                Err(error) => {
                    warn!(
                        kind = %error.kind,
                        error = %error.message,
                        latency_ms = meta.total_latency_ms,
                        "orchestration failed"
                    );
                    OrchestrationResult::failed(error, meta)
                },
            }
        };

        for (idx, model_id) in self.settings.models.iter().enumerate() {
            let Some((adapter, model)) = self.registry.route(model_id) else {
                warn!(model = %model_id, "no provider registered for model, skipping");
                continue;
            };
            let Some(breaker) = self.breakers.get(model_id) else {
                continue;
            };

            if !breaker.can_request() {
                breaker_skips += 1;
                info!(model = %model_id, "circuit open, skipping model");
                #[cfg(feature = "metrics")]
                counter!(breaker_metrics::SKIPS_TOTAL, labels::MODEL => model_id.clone())
                    .increment(1);

                if idx + 1 == total {
                    let message = match &last_error {
                        Some(err) => format!("circuit open for {model_id}; last error: {err}"),
                        None => format!("circuit open for {model_id}"),
                    };
                    return finish(
                        Err(OrchestrationError::new(ErrorKind::CircuitOpen, message)),
                        last_model,
                        last_attempts,
                    );
                }
                continue;
            }

            let adapter: &dyn ProviderAdapter = adapter.as_ref();
            let outcome = run_with_retry(&self.settings.retry, breaker, cancel, move |attempt| {
                self.attempt(adapter, model_id, model, messages, options, attempt)
            })
            .await;

            if outcome.attempts > 0 {
                last_model = Some(model_id.clone());
                last_attempts = outcome.attempts;
            }
            #[cfg(feature = "metrics")]
            gauge!(breaker_metrics::OPEN, labels::MODEL => model_id.clone()).set(
                if breaker.state() == CircuitState::Open {
                    1.0
                } else {
                    0.0
                },
            );

            match outcome.result {
                Ok(data) => return finish(Ok(data), last_model, last_attempts),
                Err(err) if err.kind == ErrorKind::Cancelled => {
                    return finish(Err(err.into()), last_model, last_attempts);
                },
                Err(err) => {
                    info!(
                        model = %model_id,
                        attempts = outcome.attempts,
                        kind = %err.kind,
                        "model failed, moving to next"
                    );
                    last_error = Some(err);
                },
            }
        }

        let error = match last_error {
            Some(err) => err.into(),
            None if breaker_skips > 0 => OrchestrationError::new(
                ErrorKind::CircuitOpen,
                "every candidate model has an open circuit",
            ),
            None => OrchestrationError::new(ErrorKind::Unknown, "all providers failed"),
        };
        finish(Err(error), last_model, last_attempts)
    }

    /// One provider call plus schema validation.
    async fn attempt(
        &self,
        adapter: &dyn ProviderAdapter,
        model_id: &str,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
        attempt: u32,
    ) -> Result<Value, ProviderError> {
        let timeout = self.settings.timeout;
        debug!(model = %model_id, attempt, "calling provider");
        #[cfg(feature = "metrics")]
        let started = Instant::now();

        let reply = match tokio::time::timeout(
            timeout,
            adapter.call(model, messages, options, timeout),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => Err(ProviderError::timeout(timeout)),
        };

        let validated = reply.and_then(|reply| match &options.schema {
            Some(schema) => schema.validate(reply),
            None => Ok(reply.into_value()),
        });

        #[cfg(feature = "metrics")]
        match &validated {
            Ok(_) => {
                counter!(
                    llm::COMPLETIONS_TOTAL,
                    labels::PROVIDER => adapter.family().to_string(),
                    labels::MODEL => model_id.to_string()
                )
                .increment(1);
                histogram!(
                    llm::COMPLETION_DURATION_SECONDS,
                    labels::PROVIDER => adapter.family().to_string(),
                    labels::MODEL => model_id.to_string()
                )
                .record(started.elapsed().as_secs_f64());
            },
            Err(err) => {
                counter!(
                    llm::COMPLETION_ERRORS_TOTAL,
                    labels::PROVIDER => adapter.family().to_string(),
                    labels::MODEL => model_id.to_string(),
                    labels::ERROR_TYPE => err.kind.as_str()
                )
                .increment(1);
            },
        }

        validated
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use {async_trait::async_trait, serde_json::json};

    use {
        super::*,
        crate::{model::ProviderReply, output::OutputSchema},
    };

    /// Replays scripted replies; once the script runs out it repeats the
    /// fallback.
    struct ScriptedAdapter {
        family: String,
        script: Mutex<VecDeque<Result<ProviderReply, ProviderError>>>,
        fallback: Result<ProviderReply, ProviderError>,
        delay: Duration,
        calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn new(family: &str, fallback: Result<ProviderReply, ProviderError>) -> Self {
            Self {
                family: family.into(),
                script: Mutex::new(VecDeque::new()),
                fallback,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn then(self, reply: Result<ProviderReply, ProviderError>) -> Self {
            self.script.lock().unwrap().push_back(reply);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn family(&self) -> &str {
            &self.family
        }

        async fn call(
            &self,
            model: &str,
            messages: &[ChatMessage],
            _options: &RequestOptions,
            _timeout: Duration,
        ) -> Result<ProviderReply, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), messages.to_vec()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn ok(text: &str) -> Result<ProviderReply, ProviderError> {
        Ok(ProviderReply::Text(text.into()))
    }

    fn fail(kind: ErrorKind) -> Result<ProviderReply, ProviderError> {
        Err(ProviderError::new(kind, format!("{kind} from mock")))
    }

    fn settings(models: &[&str], max_attempts: u32) -> OrchestratorSettings {
        OrchestratorSettings::new(
            models.iter().map(|m| (*m).to_string()).collect(),
            Duration::from_secs(30),
            RetryPolicy::new(
                max_attempts,
                Duration::from_millis(1_000),
                Duration::from_millis(10_000),
            )
            .unwrap(),
            BreakerConfig::new(3, Duration::from_secs(60)).unwrap(),
        )
        .unwrap()
    }

    fn orchestrator(
        models: &[&str],
        max_attempts: u32,
        adapters: &[Arc<ScriptedAdapter>],
    ) -> Orchestrator {
        let mut registry = ProviderRegistry::new();
        for adapter in adapters {
            registry.register(Arc::clone(adapter) as Arc<dyn ProviderAdapter>);
        }
        Orchestrator::new(settings(models, max_attempts), registry)
    }

    fn user(text: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::user(text)]
    }

    #[test]
    fn settings_from_config_validate() {
        let mut cfg = veritas_config::OrchestratorConfig::default();
        assert!(OrchestratorSettings::try_from(&cfg).is_ok());

        cfg.models.clear();
        assert_eq!(
            OrchestratorSettings::try_from(&cfg).unwrap_err(),
            ConfigError::NoModels
        );

        let mut cfg = veritas_config::OrchestratorConfig::default();
        cfg.timeout_ms = 0;
        assert!(OrchestratorSettings::try_from(&cfg).is_err());

        let mut cfg = veritas_config::OrchestratorConfig::default();
        cfg.breaker.failure_threshold = 0;
        assert!(OrchestratorSettings::try_from(&cfg).is_err());

        let mut cfg = veritas_config::OrchestratorConfig::default();
        cfg.retry.max_delay_ms = 10;
        assert!(matches!(
            OrchestratorSettings::try_from(&cfg),
            Err(ConfigError::DelayRange { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_wins() {
        let a = Arc::new(ScriptedAdapter::new("a", ok("from a")));
        let b = Arc::new(ScriptedAdapter::new("b", ok("from b")));
        let orch = orchestrator(&["a/one", "b/two"], 3, &[a.clone(), b.clone()]);

        let result = orch.orchestrate(&user("hi"), &RequestOptions::default()).await;

        assert!(result.is_success());
        assert_eq!(result.data(), Some(&json!({ "text": "from a" })));
        assert_eq!(result.meta().model_used.as_deref(), Some("a/one"));
        assert_eq!(result.meta().attempts, 1);
        assert_eq!(a.calls.lock().unwrap()[0].0, "one");
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_skips_model_without_calling_it() {
        let a = Arc::new(ScriptedAdapter::new("a", ok("from a")));
        let b = Arc::new(ScriptedAdapter::new("b", ok("from b")));
        let orch = orchestrator(&["a/one", "b/two"], 3, &[a.clone(), b.clone()]);
        let breaker = orch.breaker("a/one").unwrap();
        for _ in 0..3 {
            breaker.record_failure();
        }

        let result = orch.orchestrate(&user("hi"), &RequestOptions::default()).await;

        assert!(result.is_success());
        assert_eq!(result.meta().model_used.as_deref(), Some("b/two"));
        assert_eq!(result.meta().attempts, 1);
        assert_eq!(a.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_chain_reports_last_concrete_error() {
        let a = Arc::new(ScriptedAdapter::new("a", fail(ErrorKind::Network)));
        let b = Arc::new(ScriptedAdapter::new("b", fail(ErrorKind::RateLimit)));
        let orch = orchestrator(&["a/one", "b/two"], 3, &[a.clone(), b.clone()]);

        let result = orch.orchestrate(&user("hi"), &RequestOptions::default()).await;

        assert!(!result.is_success());
        assert!(result.data().is_none());
        assert_eq!(result.error().unwrap().kind, ErrorKind::RateLimit);
        assert_eq!(result.meta().model_used.as_deref(), Some("b/two"));
        assert_eq!(result.meta().attempts, 3);
        assert_eq!(a.call_count(), 3);
        assert_eq!(b.call_count(), 3);
        // 3 failures each open both circuits.
        assert_eq!(
            orch.breaker_states(),
            vec![
                ("a/one".to_string(), CircuitState::Open),
                ("b/two".to_string(), CircuitState::Open)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_unknown_chain_surfaces_unknown() {
        let a = Arc::new(ScriptedAdapter::new("a", fail(ErrorKind::Unknown)));
        let b = Arc::new(ScriptedAdapter::new("b", fail(ErrorKind::Unknown)));
        let orch = orchestrator(&["a/one", "b/two"], 2, &[a.clone(), b.clone()]);

        let result = orch.orchestrate(&user("hi"), &RequestOptions::default()).await;

        let error = result.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Unknown);
        // The provider's own message, not the "nothing ran" fallback.
        assert_eq!(error.message, "UNKNOWN from mock");
        assert_eq!(error.http_status(), 502);
        assert_eq!(result.meta().model_used.as_deref(), Some("b/two"));
        assert_eq!(result.meta().attempts, 2);
        assert_eq!(a.call_count(), 2);
        assert_eq!(b.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_within_model_follow_backoff() {
        let a = Arc::new(
            ScriptedAdapter::new("a", ok("third time"))
                .then(fail(ErrorKind::Timeout))
                .then(fail(ErrorKind::Unknown)),
        );
        let orch = orchestrator(&["a/one"], 3, &[a.clone()]);

        let result = orch.orchestrate(&user("hi"), &RequestOptions::default()).await;

        assert!(result.is_success());
        assert_eq!(result.meta().attempts, 3);
        assert_eq!(result.meta().total_latency_ms, 3_000);
        assert_eq!(orch.breaker("a/one").unwrap().failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_moves_to_next_model() {
        let a = Arc::new(ScriptedAdapter::new("a", fail(ErrorKind::Auth)));
        let b = Arc::new(ScriptedAdapter::new("b", ok("from b")));
        let orch = orchestrator(&["a/one", "b/two"], 3, &[a.clone(), b.clone()]);

        let result = orch.orchestrate(&user("hi"), &RequestOptions::default()).await;

        assert!(result.is_success());
        assert_eq!(a.call_count(), 1);
        assert_eq!(result.meta().model_used.as_deref(), Some("b/two"));
    }

    #[tokio::test(start_paused = true)]
    async fn validation_failure_consumes_attempt() {
        let schema = OutputSchema::new(json!({
            "type": "object",
            "required": ["content"],
            "properties": { "content": { "type": "string" } }
        }))
        .unwrap();
        let a = Arc::new(
            ScriptedAdapter::new(
                "a",
                Ok(ProviderReply::Structured(json!({ "content": "valid" }))),
            )
            .then(ok("not json at all")),
        );
        let orch = orchestrator(&["a/one"], 3, &[a.clone()]);

        let result = orch
            .orchestrate(&user("hi"), &RequestOptions::default().with_schema(schema))
            .await;

        assert!(result.is_success());
        assert_eq!(result.data().unwrap()["content"], "valid");
        assert_eq!(result.meta().attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_exhaustion_surfaces_validation() {
        let schema =
            OutputSchema::new(json!({ "type": "object", "required": ["content"] })).unwrap();
        let a = Arc::new(ScriptedAdapter::new("a", ok("prose")));
        let orch = orchestrator(&["a/one"], 2, &[a.clone()]);

        let result = orch
            .orchestrate(&user("hi"), &RequestOptions::default().with_schema(schema))
            .await;

        assert_eq!(result.error().unwrap().kind, ErrorKind::Validation);
        assert_eq!(result.meta().attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn last_model_open_fails_with_circuit_open() {
        let a = Arc::new(ScriptedAdapter::new("a", fail(ErrorKind::Network)));
        let b = Arc::new(ScriptedAdapter::new("b", ok("from b")));
        let orch = orchestrator(&["a/one", "b/two"], 1, &[a.clone(), b.clone()]);
        let breaker = orch.breaker("b/two").unwrap();
        for _ in 0..3 {
            breaker.record_failure();
        }

        let result = orch.orchestrate(&user("hi"), &RequestOptions::default()).await;

        let error = result.error().unwrap();
        assert_eq!(error.kind, ErrorKind::CircuitOpen);
        assert!(error.message.contains("NETWORK"), "{}", error.message);
        assert_eq!(error.http_status(), 503);
        assert_eq!(result.meta().model_used.as_deref(), Some("a/one"));
        assert_eq!(result.meta().attempts, 1);
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unroutable_models_are_skipped() {
        let b = Arc::new(ScriptedAdapter::new("b", ok("from b")));
        let orch = orchestrator(&["gpt-4o", "missing/model", "b/two"], 3, &[b.clone()]);

        let result = orch.orchestrate(&user("hi"), &RequestOptions::default()).await;

        assert!(result.is_success());
        assert_eq!(result.meta().model_used.as_deref(), Some("b/two"));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_routable_is_unknown() {
        let orch = orchestrator(&["missing/model"], 3, &[]);
        let result = orch.orchestrate(&user("hi"), &RequestOptions::default()).await;
        let error = result.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Unknown);
        assert_eq!(error.message, "all providers failed");
        assert_eq!(result.meta().model_used, None);
        assert_eq!(result.meta().attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_adapter_times_out() {
        let a = Arc::new(
            ScriptedAdapter::new("a", ok("late")).with_delay(Duration::from_secs(120)),
        );
        let orch = orchestrator(&["a/one"], 2, &[a.clone()]);

        let result = orch.orchestrate(&user("hi"), &RequestOptions::default()).await;

        assert_eq!(result.error().unwrap().kind, ErrorKind::Timeout);
        assert_eq!(result.error().unwrap().http_status(), 504);
        assert_eq!(result.meta().attempts, 2);
        // Two 30s timeouts plus one 1s backoff.
        assert_eq!(result.meta().total_latency_ms, 61_000);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_without_touching_breaker() {
        let a = Arc::new(
            ScriptedAdapter::new("a", ok("late")).with_delay(Duration::from_secs(10)),
        );
        let b = Arc::new(ScriptedAdapter::new("b", ok("from b")));
        let orch = orchestrator(&["a/one", "b/two"], 3, &[a.clone(), b.clone()]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = orch
            .orchestrate_with_cancel(&user("hi"), &RequestOptions::default(), &cancel)
            .await;

        assert_eq!(result.error().unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(b.call_count(), 0);
        assert_eq!(orch.breaker("a/one").unwrap().failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_makes_no_attempt() {
        let a = Arc::new(ScriptedAdapter::new("a", ok("from a")));
        let b = Arc::new(ScriptedAdapter::new("b", ok("from b")));
        let orch = orchestrator(&["a/one", "b/two"], 3, &[a.clone(), b.clone()]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orch
            .orchestrate_with_cancel(&user("hi"), &RequestOptions::default(), &cancel)
            .await;

        assert_eq!(result.error().unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(result.meta().attempts, 0);
        assert_eq!(result.meta().model_used, None);
        assert_eq!(a.call_count(), 0);
        assert_eq!(b.call_count(), 0);
        assert_eq!(orch.breaker("a/one").unwrap().failures(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_are_all_counted() {
        let a = Arc::new(
            ScriptedAdapter::new("a", fail(ErrorKind::Network))
                .with_delay(Duration::from_millis(20)),
        );
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::clone(&a) as Arc<dyn ProviderAdapter>);
        let settings = OrchestratorSettings::new(
            vec!["a/one".into()],
            Duration::from_secs(30),
            RetryPolicy::new(1, Duration::ZERO, Duration::ZERO).unwrap(),
            BreakerConfig::new(16, Duration::from_secs(60)).unwrap(),
        )
        .unwrap();
        let orch = Arc::new(Orchestrator::new(settings, registry));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move {
                    orch.orchestrate(&user(&format!("q{i}")), &RequestOptions::default())
                        .await
                })
            })
            .collect();
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.error().unwrap().kind, ErrorKind::Network);
        }

        assert_eq!(a.call_count(), 16);
        let breaker = orch.breaker("a/one").unwrap();
        assert_eq!(breaker.failures(), 16);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_never_overlap_and_history_is_passed_in_order() {
        let a = Arc::new(
            ScriptedAdapter::new("a", fail(ErrorKind::Network))
                .with_delay(Duration::from_millis(50)),
        );
        let b = Arc::new(
            ScriptedAdapter::new("b", ok("done")).with_delay(Duration::from_millis(50)),
        );
        let orch = orchestrator(&["a/one", "b/two"], 3, &[a.clone(), b.clone()]);
        let history = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("second"),
        ];

        let result = orch.orchestrate(&history, &RequestOptions::default()).await;

        assert!(result.is_success());
        assert_eq!(a.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(b.max_in_flight.load(Ordering::SeqCst), 1);
        for (_, sent) in a.calls.lock().unwrap().iter().chain(b.calls.lock().unwrap().iter()) {
            assert_eq!(sent, &history);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn correlation_ids_are_unique_and_meta_serializes_camel_case() {
        let a = Arc::new(ScriptedAdapter::new("a", ok("x")));
        let orch = orchestrator(&["a/one"], 1, &[a]);
        let first = orch.orchestrate(&user("1"), &RequestOptions::default()).await;
        let second = orch.orchestrate(&user("2"), &RequestOptions::default()).await;
        assert_ne!(first.meta().correlation_id, second.meta().correlation_id);

        let value = serde_json::to_value(&first).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["meta"]["modelUsed"], "a/one");
        assert_eq!(value["meta"]["attempts"], 1);
        assert!(value["meta"]["correlationId"].is_string());
        assert!(value["meta"]["totalLatencyMs"].is_u64());
        assert!(value.get("error").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_result_serializes_error_type() {
        let a = Arc::new(ScriptedAdapter::new("a", fail(ErrorKind::InvalidRequest)));
        let orch = orchestrator(&["a/one"], 3, &[a]);
        let result = orch.orchestrate(&user("1"), &RequestOptions::default()).await;
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["type"], "INVALID_REQUEST");
        assert!(value.get("data").is_none());

        let (outcome, meta) = result.into_parts();
        assert_eq!(outcome.unwrap_err().kind, ErrorKind::InvalidRequest);
        assert_eq!(meta.attempts, 1);
    }
}
