//! Metric definitions for veritas.
//!
//! Recording goes through the `metrics` crate facade, so every call site is a
//! no-op until the embedding application installs a recorder (Prometheus,
//! statsd, ...).
//!
//! ```rust,ignore
//! use veritas_metrics::{counter, labels, llm};
//!
//! counter!(llm::COMPLETIONS_TOTAL, labels::MODEL => "openai/gpt-4o").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
