//! Metric name and label definitions.
//!
//! Keeping every name here makes it easy to see what the crates emit.

/// Provider call metrics, one sample per attempt.
pub mod llm {
    /// Successful provider completions
    pub const COMPLETIONS_TOTAL: &str = "veritas_llm_completions_total";
    /// Failed provider attempts, labelled by error type
    pub const COMPLETION_ERRORS_TOTAL: &str = "veritas_llm_completion_errors_total";
    /// Provider call duration in seconds
    pub const COMPLETION_DURATION_SECONDS: &str = "veritas_llm_completion_duration_seconds";
}

/// Orchestration metrics, one sample per top-level call.
pub mod orchestration {
    /// Orchestration calls, labelled by success
    pub const CALLS_TOTAL: &str = "veritas_orchestration_calls_total";
    /// Attempts consumed by the model that answered (or was tried last)
    pub const ATTEMPTS: &str = "veritas_orchestration_attempts";
    /// End-to-end orchestration duration in seconds
    pub const DURATION_SECONDS: &str = "veritas_orchestration_duration_seconds";
}

/// Circuit breaker metrics
pub mod breaker {
    /// Models skipped because their circuit was open
    pub const SKIPS_TOTAL: &str = "veritas_breaker_skips_total";
    /// 1 while a model's circuit is open, 0 otherwise
    pub const OPEN: &str = "veritas_breaker_open";
}

/// Chat metrics
pub mod chat {
    /// Chat turns handled, labelled by success
    pub const TURNS_TOTAL: &str = "veritas_chat_turns_total";
    /// Citations returned with successful replies
    pub const CITATIONS_TOTAL: &str = "veritas_chat_citations_total";
    /// Context sources that failed or timed out, labelled by source
    pub const CONTEXT_ERRORS_TOTAL: &str = "veritas_chat_context_errors_total";
}

/// Common label keys
pub mod labels {
    pub const PROVIDER: &str = "provider";
    pub const MODEL: &str = "model";
    pub const ERROR_TYPE: &str = "error_type";
    pub const SUCCESS: &str = "success";
    pub const DEPTH: &str = "depth";
    pub const SOURCE: &str = "source";
}
