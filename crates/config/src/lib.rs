//! Configuration loading, validation and env substitution.
//!
//! Config files: `veritas.toml`, `veritas.yaml` or `veritas.json`
//! Searched in `./` then `~/.config/veritas/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        BreakerSection, ChatConfig, OrchestratorConfig, ProviderEntry, ProvidersConfig,
        RetrySection, VeritasConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
