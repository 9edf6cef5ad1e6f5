//! Provider adapters and the family → adapter registry.
//!
//! Model ids are namespaced as `family/model` (`openai/gpt-4o`,
//! `openrouter/meta-llama/llama-3.1-70b`); everything after the first `/`
//! is passed to the adapter verbatim.

pub mod anthropic;
pub mod openai_compat;

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
    veritas_config::ProvidersConfig,
};

use crate::{
    error::{ErrorKind, ProviderError},
    model::ProviderAdapter,
};

/// Shared HTTP client for all adapters. Timeouts are set per request.
pub(crate) fn shared_http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::LazyLock<reqwest::Client> =
        std::sync::LazyLock::new(reqwest::Client::new);
    &CLIENT
}

// ── Model ids ───────────────────────────────────────────────────────────────

/// A `family/model` identifier split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRef<'a> {
    pub family: &'a str,
    pub model: &'a str,
}

impl<'a> ModelRef<'a> {
    /// `None` for ids without a family prefix or with an empty part.
    #[must_use]
    pub fn parse(id: &'a str) -> Option<Self> {
        let (family, model) = id.split_once('/')?;
        let family = family.trim();
        let model = model.trim();
        if family.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self { family, model })
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Static description of a built-in provider family.
struct FamilySpec {
    family: &'static str,
    kind: AdapterKind,
    default_base_url: &'static str,
    /// Env vars checked in order when the config has no `api_key`.
    key_env: &'static [&'static str],
    base_url_env: &'static [&'static str],
    requires_key: bool,
    supports_json_mode: bool,
}

#[derive(Clone, Copy)]
enum AdapterKind {
    OpenAiCompat,
    Anthropic,
}

const BUILTIN_FAMILIES: &[FamilySpec] = &[
    FamilySpec {
        family: "openai",
        kind: AdapterKind::OpenAiCompat,
        default_base_url: "https://api.openai.com/v1",
        key_env: &["OPENAI_API_KEY", "AI_INTEGRATIONS_OPENAI_API_KEY"],
        base_url_env: &["OPENAI_BASE_URL", "AI_INTEGRATIONS_OPENAI_BASE_URL"],
        requires_key: true,
        supports_json_mode: true,
    },
    FamilySpec {
        family: "anthropic",
        kind: AdapterKind::Anthropic,
        default_base_url: "https://api.anthropic.com",
        key_env: &["ANTHROPIC_API_KEY"],
        base_url_env: &["ANTHROPIC_BASE_URL"],
        requires_key: true,
        supports_json_mode: false,
    },
    FamilySpec {
        family: "openrouter",
        kind: AdapterKind::OpenAiCompat,
        default_base_url: "https://openrouter.ai/api/v1",
        key_env: &["OPENROUTER_API_KEY"],
        base_url_env: &["OPENROUTER_BASE_URL"],
        requires_key: true,
        supports_json_mode: true,
    },
    FamilySpec {
        family: "mistral",
        kind: AdapterKind::OpenAiCompat,
        default_base_url: "https://api.mistral.ai/v1",
        key_env: &["MISTRAL_API_KEY"],
        base_url_env: &["MISTRAL_BASE_URL"],
        requires_key: true,
        supports_json_mode: true,
    },
    FamilySpec {
        family: "huggingface",
        kind: AdapterKind::OpenAiCompat,
        default_base_url: "https://router.huggingface.co/v1",
        key_env: &["HF_TOKEN", "HUGGINGFACE_API_KEY"],
        base_url_env: &["HUGGINGFACE_BASE_URL"],
        requires_key: true,
        supports_json_mode: false,
    },
    FamilySpec {
        family: "ollama",
        kind: AdapterKind::OpenAiCompat,
        default_base_url: "http://127.0.0.1:11434/v1",
        key_env: &["OLLAMA_API_KEY"],
        base_url_env: &["OLLAMA_BASE_URL"],
        requires_key: false,
        supports_json_mode: true,
    },
];

/// Names of the built-in families, in registration order.
pub fn builtin_families() -> impl Iterator<Item = &'static str> {
    BUILTIN_FAMILIES.iter().map(|spec| spec.family)
}

/// Maps a model family key to the adapter that serves it.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own family key, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.family().to_string(), adapter);
    }

    pub fn get(&self, family: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(family).cloned()
    }

    /// Registered family keys, sorted.
    pub fn families(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Resolve a `family/model` id to its adapter and the bare model name.
    pub fn route<'a>(&self, model_id: &'a str) -> Option<(Arc<dyn ProviderAdapter>, &'a str)> {
        let model_ref = ModelRef::parse(model_id)?;
        self.get(model_ref.family)
            .map(|adapter| (adapter, model_ref.model))
    }

    /// Build the built-in adapters from config and environment.
    ///
    /// Disabled families are never registered. Families that need a key are
    /// registered only when one resolves from config or env.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self::from_config_with_env(config, |name| std::env::var(name).ok())
    }

    pub(crate) fn from_config_with_env(
        config: &ProvidersConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut reg = Self::new();

        for spec in BUILTIN_FAMILIES {
            if !config.is_enabled(spec.family) {
                debug!(family = spec.family, "provider disabled in config");
                continue;
            }

            let api_key = resolve_api_key(config, spec.family, spec.key_env, &env);
            if spec.requires_key && api_key.is_none() {
                debug!(family = spec.family, "no api key, provider not registered");
                continue;
            }

            let base_url = config
                .get(spec.family)
                .and_then(|e| e.base_url.clone())
                .or_else(|| {
                    spec.base_url_env
                        .iter()
                        .find_map(|name| env(name).filter(|v| !v.is_empty()))
                })
                .unwrap_or_else(|| spec.default_base_url.to_string());

            let adapter: Arc<dyn ProviderAdapter> = match spec.kind {
                AdapterKind::OpenAiCompat => Arc::new(
                    openai_compat::OpenAiCompatAdapter::new(spec.family, base_url, api_key)
                        .with_json_mode(spec.supports_json_mode),
                ),
                AdapterKind::Anthropic => match api_key {
                    Some(key) => Arc::new(anthropic::AnthropicAdapter::new(key, base_url)),
                    None => continue,
                },
            };
            debug!(family = spec.family, "registered provider");
            reg.register(adapter);
        }

        reg
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("families", &self.families())
            .finish()
    }
}

/// Resolve an API key from config or environment, keeping it wrapped in
/// `Secret<String>`.
fn resolve_api_key(
    config: &ProvidersConfig,
    family: &str,
    env_keys: &[&str],
    env: &impl Fn(&str) -> Option<String>,
) -> Option<Secret<String>> {
    config
        .get(family)
        .and_then(|e| e.api_key.clone())
        .or_else(|| {
            env_keys
                .iter()
                .find_map(|name| env(name).filter(|k| !k.is_empty()))
                .map(Secret::new)
        })
        .filter(|s| !s.expose_secret().is_empty())
}

// ── Shared response handling ────────────────────────────────────────────────

/// Map a transport-level reqwest failure.
pub(crate) fn transport_error(err: &reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        ProviderError::new(ErrorKind::Network, err.to_string())
    } else if err.is_decode() {
        ProviderError::new(ErrorKind::Unknown, format!("malformed response: {err}"))
    } else {
        ProviderError::from_message(err.to_string())
    }
}

/// Turn a non-2xx response into a classified error.
pub(crate) async fn status_error(resp: reqwest::Response) -> ProviderError {
    let status = resp.status().as_u16();
    let retry_after_ms = retry_after_ms_from_headers(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    let mut err = ProviderError::from_status(status, &body);
    err.message = with_retry_after_marker(err.message, retry_after_ms);
    err
}

/// Parse `Retry-After` delta-seconds as milliseconds.
pub(crate) fn retry_after_ms_from_headers(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?;
    let text = value.to_str().ok()?.trim();
    let seconds = text.parse::<u64>().ok()?;
    seconds.checked_mul(1_000)
}

pub(crate) fn with_retry_after_marker(base: String, retry_after_ms: Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!("{base} (retry_after_ms={ms})"),
        None => base,
    }
}

/// Drop `<think>...</think>` reasoning blocks. An unclosed block swallows the
/// rest of the text.
pub(crate) fn strip_think_tags(content: &str) -> String {
    let mut visible = String::new();
    let mut remaining = content;

    while let Some(start) = remaining.find("<think>") {
        visible.push_str(&remaining[..start]);
        let after_open = &remaining[start + "<think>".len()..];
        match after_open.find("</think>") {
            Some(end) => remaining = &after_open[end + "</think>".len()..],
            None => {
                remaining = "";
                break;
            },
        }
    }
    visible.push_str(remaining);
    visible.trim().to_string()
}
