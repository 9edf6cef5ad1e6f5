//! Resilient multi-provider LLM request orchestration.
//!
//! A call walks an ordered list of `family/model` ids. Each model is gated by
//! its own [`CircuitBreaker`], retried with bounded exponential backoff, and
//! its reply is optionally validated against a JSON Schema. The caller always
//! gets an [`OrchestrationResult`]; failures are data, never panics.

pub mod breaker;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod providers;
pub mod retry;

pub use {
    breaker::{BreakerConfig, CircuitBreaker, CircuitState},
    error::{ConfigError, ErrorKind, OrchestrationError, ProviderError},
    model::{ChatMessage, Depth, ProviderAdapter, ProviderReply, RequestOptions, Role},
    orchestrator::{OrchestrationResult, Orchestrator, OrchestratorSettings, ResponseMeta},
    output::OutputSchema,
    providers::{ModelRef, ProviderRegistry},
    retry::{RetryOutcome, RetryPolicy, run_with_retry},
};

/// Re-exported so callers can cancel without depending on tokio-util directly.
pub use tokio_util::sync::CancellationToken;
