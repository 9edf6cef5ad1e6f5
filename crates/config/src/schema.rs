/// Config schema types (orchestrator, providers, chat).
use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VeritasConfig {
    pub orchestrator: OrchestratorConfig,
    pub providers: ProvidersConfig,
    pub chat: ChatConfig,
}

/// Model chain, timeout, retry and circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Ordered model chain in `family/model` form, tried first to last.
    pub models: Vec<String>,
    /// Per-call provider timeout in milliseconds. Defaults to 30000.
    pub timeout_ms: u64,
    pub retry: RetrySection,
    pub breaker: BreakerSection,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            models: vec!["openai/gpt-4o".into(), "ollama/mistral".into()],
            timeout_ms: 30_000,
            retry: RetrySection::default(),
            breaker: BreakerSection::default(),
        }
    }
}

/// Retry budget for a single model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Attempts per model, including the first one. Defaults to 3.
    pub max_attempts: u32,
    /// Delay before the second attempt. Doubles for every further attempt.
    pub base_delay_ms: u64,
    /// Upper bound for any single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

/// Per-model circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    /// Consecutive failures that open the circuit. Defaults to 3.
    pub failure_threshold: u32,
    /// Time after the last failure before an open circuit lets a probe through.
    pub reset_time_ms: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_time_ms: 60_000,
        }
    }
}

/// Chat framing and history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Replaces the built-in VERITAS system prompt when set.
    pub system_prompt: Option<String>,
    /// Most recent history messages (the new one included) sent with each
    /// turn. `None` sends all.
    pub history_window: Option<usize>,
    /// Ask models for `{ content, citations }` JSON and validate it.
    pub structured_output: bool,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Knowledge layer used when a turn does not name one
    /// ("SURFACE", "DEEP", "DARK" or "VAULT").
    pub default_depth: String,
    /// Context sources consulted before each turn ("wayback", "github").
    /// Empty disables enrichment.
    pub context_sources: Vec<String>,
    /// Per-source time budget for context gathering, in milliseconds.
    pub context_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            history_window: None,
            structured_output: true,
            max_tokens: 800,
            temperature: None,
            default_depth: "SURFACE".into(),
            context_sources: Vec::new(),
            context_timeout_ms: 8_000,
        }
    }
}

/// Provider-specific settings keyed by model family ("openai", "anthropic", ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(flatten)]
    pub providers: HashMap<String, ProviderEntry>,
}

/// Configuration for a single provider family.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEntry {
    /// Whether this provider is enabled. Defaults to true.
    pub enabled: bool,

    /// API key override. When absent the family's env var is used.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,

    /// Override the base URL.
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for ProviderEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: None,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

impl ProvidersConfig {
    /// Check if a provider is enabled (defaults to true if not configured).
    pub fn is_enabled(&self, name: &str) -> bool {
        self.providers.get(name).is_none_or(|e| e.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }
}
