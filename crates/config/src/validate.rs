//! Configuration validation engine.
//!
//! Validates configuration files against the known schema, detects
//! unknown/misspelled fields, checks orchestrator settings for values the
//! runtime would reject, and reports security warnings.

use std::{collections::HashMap, path::Path};

use crate::{env_subst::substitute_env, schema::VeritasConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "unknown-provider", "type-error",
    /// "invalid-value", "routing", "security", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "orchestrator.retry.max_attempts"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Expected shape of the configuration schema.
enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// A map with dynamic keys (`providers`) whose values have a known shape.
    Map(Box<KnownKeys>),
    /// Scalar or list of scalars; stop recursion.
    Leaf,
}

/// Model families with a built-in adapter.
pub const KNOWN_PROVIDER_NAMES: &[&str] = &[
    "anthropic",
    "huggingface",
    "mistral",
    "ollama",
    "openai",
    "openrouter",
];

const KNOWN_DEPTHS: &[&str] = &["SURFACE", "DEEP", "DARK", "VAULT"];

/// Context sources the chat layer can build.
pub const KNOWN_CONTEXT_SOURCES: &[&str] = &["wayback", "github"];

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    let provider_entry = Struct(HashMap::from([
        ("enabled", Leaf),
        ("api_key", Leaf),
        ("base_url", Leaf),
    ]));

    Struct(HashMap::from([
        (
            "orchestrator",
            Struct(HashMap::from([
                ("models", Leaf),
                ("timeout_ms", Leaf),
                (
                    "retry",
                    Struct(HashMap::from([
                        ("max_attempts", Leaf),
                        ("base_delay_ms", Leaf),
                        ("max_delay_ms", Leaf),
                    ])),
                ),
                (
                    "breaker",
                    Struct(HashMap::from([
                        ("failure_threshold", Leaf),
                        ("reset_time_ms", Leaf),
                    ])),
                ),
            ])),
        ),
        ("providers", Map(Box::new(provider_entry))),
        (
            "chat",
            Struct(HashMap::from([
                ("system_prompt", Leaf),
                ("history_window", Leaf),
                ("structured_output", Leaf),
                ("max_tokens", Leaf),
                ("temperature", Leaf),
                ("default_depth", Leaf),
                ("context_sources", Leaf),
                ("context_timeout_ms", Leaf),
            ])),
        ),
    ]))
}

// ── Levenshtein for typo suggestions ────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered config file
/// when `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        let mut diagnostics = vec![Diagnostic::new(
            Severity::Info,
            "file-ref",
            "",
            "no config file found; using defaults",
        )];
        check_semantics(&VeritasConfig::default(), &mut diagnostics);
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    };

    let format = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml")
        .to_string();

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let mut result = validate_str(&content, &format);
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate a TOML string without file-system side effects.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    validate_str(toml_str, "toml")
}

/// Validate raw config text in the given format ("toml", "yaml", "yml", "json").
#[must_use]
pub fn validate_str(raw: &str, format: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax, on the text as written (before env substitution) so literal
    //    secrets can be spotted.
    let written = match parse_value(raw, format) {
        Ok(v) => v,
        Err(message) => {
            diagnostics.push(Diagnostic::new(Severity::Error, "syntax", "", message));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&written, &build_schema_map(), "", &mut diagnostics);

    // 3. Provider names and literal keys
    if let Some(providers) = written.get("providers").and_then(|v| v.as_object()) {
        check_providers(providers, &mut diagnostics);
    }

    // 4. Type check, with env placeholders resolved like the loader does
    let substituted = substitute_env(raw);
    let typed = parse_value(&substituted, format).and_then(|v| {
        serde_json::from_value::<VeritasConfig>(v).map_err(|e| e.to_string())
    });

    match typed {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn parse_value(raw: &str, format: &str) -> Result<serde_json::Value, String> {
    match format {
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| format!("TOML syntax error: {e}"))
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "yaml" | "yml" => {
            if raw.trim().is_empty() {
                return Ok(serde_json::Value::Object(Default::default()));
            }
            serde_yaml::from_str::<serde_json::Value>(raw)
                .map_err(|e| format!("YAML syntax error: {e}"))
        },
        "json" => serde_json::from_str(raw).map_err(|e| format!("JSON syntax error: {e}")),
        other => Err(format!("unsupported config format: .{other}")),
    }
}

/// Walk the parsed value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(table) = value.as_object() else {
        return;
    };
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };

    match schema {
        KnownKeys::Struct(fields) => {
            let known_keys: Vec<&str> = fields.keys().copied().collect();
            for (key, child) in table {
                let path = join(key);
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child, child_schema, &path, diagnostics);
                    continue;
                }
                let level = if prefix.is_empty() {
                    "at top level "
                } else {
                    ""
                };
                let msg = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field {level}(did you mean \"{s}\"?)"),
                    None => format!("unknown field {level}"),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    path,
                    msg.trim(),
                ));
            }
        },
        KnownKeys::Map(value_schema) => {
            for (key, child) in table {
                check_unknown_fields(child, value_schema, &join(key), diagnostics);
            }
        },
        KnownKeys::Leaf => {},
    }
}

/// Warn about unknown family names and API keys written literally.
fn check_providers(
    providers: &serde_json::Map<String, serde_json::Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (name, entry) in providers {
        if !KNOWN_PROVIDER_NAMES.contains(&name.as_str()) {
            let msg = match suggest(name, KNOWN_PROVIDER_NAMES, 3) {
                Some(s) => format!("unknown provider name (did you mean \"{s}\"?)"),
                None => "unknown provider name (no built-in adapter for this family)".into(),
            };
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "unknown-provider",
                format!("providers.{name}"),
                msg,
            ));
        }

        if let Some(key) = entry.get("api_key").and_then(|v| v.as_str())
            && !key.is_empty()
            && !key.contains("${")
        {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "security",
                format!("providers.{name}.api_key"),
                "API key is written literally in the config file; prefer ${ENV_VAR}",
            ));
        }
    }
}

/// Semantic checks on a parsed config. Errors mirror the values the runtime
/// settings conversion rejects.
pub fn check_semantics(config: &VeritasConfig, diagnostics: &mut Vec<Diagnostic>) {
    use Severity::{Error, Info, Warning};

    let orch = &config.orchestrator;

    if orch.models.is_empty() {
        diagnostics.push(Diagnostic::new(
            Error,
            "invalid-value",
            "orchestrator.models",
            "model list is empty; at least one model is required",
        ));
    }

    for (i, model) in orch.models.iter().enumerate() {
        let path = format!("orchestrator.models[{i}]");
        let Some((family, name)) = model.split_once('/') else {
            diagnostics.push(Diagnostic::new(
                Warning,
                "routing",
                path,
                format!("\"{model}\" has no family prefix (expected family/model); it will be skipped"),
            ));
            continue;
        };
        if family.is_empty() || name.is_empty() {
            diagnostics.push(Diagnostic::new(
                Warning,
                "routing",
                path,
                format!("\"{model}\" is not of the form family/model; it will be skipped"),
            ));
            continue;
        }
        if !config.providers.is_enabled(family) {
            diagnostics.push(Diagnostic::new(
                Warning,
                "routing",
                path,
                format!("provider \"{family}\" is disabled; \"{model}\" will be skipped"),
            ));
        } else if !KNOWN_PROVIDER_NAMES.contains(&family) {
            diagnostics.push(Diagnostic::new(
                Warning,
                "routing",
                path,
                format!("no built-in adapter for family \"{family}\"; \"{model}\" will be skipped"),
            ));
        }
    }

    if orch.timeout_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Error,
            "invalid-value",
            "orchestrator.timeout_ms",
            "timeout must be positive",
        ));
    }

    let retry = &orch.retry;
    if retry.max_attempts == 0 {
        diagnostics.push(Diagnostic::new(
            Error,
            "invalid-value",
            "orchestrator.retry.max_attempts",
            "max_attempts must be at least 1",
        ));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        diagnostics.push(Diagnostic::new(
            Error,
            "invalid-value",
            "orchestrator.retry.max_delay_ms",
            format!(
                "max_delay_ms ({}) is smaller than base_delay_ms ({})",
                retry.max_delay_ms, retry.base_delay_ms
            ),
        ));
    }

    let breaker = &orch.breaker;
    if breaker.failure_threshold == 0 {
        diagnostics.push(Diagnostic::new(
            Error,
            "invalid-value",
            "orchestrator.breaker.failure_threshold",
            "failure_threshold must be at least 1",
        ));
    }
    if breaker.reset_time_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Warning,
            "invalid-value",
            "orchestrator.breaker.reset_time_ms",
            "reset_time_ms is 0: an open circuit lets the next request through immediately",
        ));
    }

    let chat = &config.chat;
    if chat.history_window == Some(0) {
        diagnostics.push(Diagnostic::new(
            Error,
            "invalid-value",
            "chat.history_window",
            "history_window must be at least 1 (omit it to send the full history)",
        ));
    }
    if !KNOWN_DEPTHS.contains(&chat.default_depth.to_ascii_uppercase().as_str()) {
        diagnostics.push(Diagnostic::new(
            Error,
            "invalid-value",
            "chat.default_depth",
            format!(
                "unknown depth \"{}\"; expected one of: {}",
                chat.default_depth,
                KNOWN_DEPTHS.join(", ")
            ),
        ));
    }
    if let Some(t) = chat.temperature
        && !(0.0..=2.0).contains(&t)
    {
        diagnostics.push(Diagnostic::new(
            Warning,
            "invalid-value",
            "chat.temperature",
            format!("temperature {t} is outside the usual 0.0-2.0 range"),
        ));
    }
    if chat.max_tokens == 0 {
        diagnostics.push(Diagnostic::new(
            Error,
            "invalid-value",
            "chat.max_tokens",
            "max_tokens must be positive",
        ));
    }

    for (i, name) in chat.context_sources.iter().enumerate() {
        if !KNOWN_CONTEXT_SOURCES.contains(&name.to_ascii_lowercase().as_str()) {
            let hint = match suggest(name, KNOWN_CONTEXT_SOURCES, 3) {
                Some(s) => format!("; did you mean \"{s}\"?"),
                None => format!("; expected one of: {}", KNOWN_CONTEXT_SOURCES.join(", ")),
            };
            diagnostics.push(Diagnostic::new(
                Error,
                "invalid-value",
                format!("chat.context_sources[{i}]"),
                format!("unknown context source \"{name}\"{hint}"),
            ));
        }
    }
    if !chat.context_sources.is_empty() && chat.context_timeout_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Error,
            "invalid-value",
            "chat.context_timeout_ms",
            "context_timeout_ms must be positive when context sources are enabled",
        ));
    }

    if chat.system_prompt.as_deref().is_some_and(|p| p.trim().is_empty()) {
        diagnostics.push(Diagnostic::new(
            Info,
            "invalid-value",
            "chat.system_prompt",
            "system_prompt is blank; the built-in prompt will be used",
        ));
    }
}
