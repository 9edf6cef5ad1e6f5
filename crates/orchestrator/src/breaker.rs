//! Per-model circuit breaker.
//!
//! CLOSED → OPEN after `failure_threshold` consecutive failures. OPEN →
//! HALF_OPEN lazily, on the first `can_request()` once more than
//! `reset_time` has passed since the last failure. Any success closes the
//! circuit and zeroes the counter; the counter is *not* reset on the way to
//! HALF_OPEN, so one failed probe re-opens it.

use std::{sync::Mutex, time::Duration};

use {
    serde::{Deserialize, Serialize},
    tokio::time::Instant,
    tracing::{debug, warn},
};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    failure_threshold: u32,
    reset_time: Duration,
}

impl BreakerConfig {
    /// `failure_threshold` must be positive. A zero `reset_time` is accepted:
    /// the breaker then lets a probe through on the very next check.
    pub fn new(failure_threshold: u32, reset_time: Duration) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::TooSmall {
                field: "failure_threshold",
                min: 1,
                value: 0,
            });
        }
        if reset_time.is_zero() {
            warn!("breaker reset_time is 0, open circuits will never block");
        }
        Ok(Self {
            failure_threshold,
            reset_time,
        })
    }

    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    #[must_use]
    pub fn reset_time(&self) -> Duration {
        self.reset_time
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_time: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Failure tracker for one model. Safe to share across concurrent calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a request may go through. Moves OPEN to HALF_OPEN once the
    /// reset time has elapsed; otherwise has no side effects.
    pub fn can_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .is_none_or(|t| t.elapsed() > self.config.reset_time);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    debug!(breaker = %self.name, "circuit half-open, probing");
                }
                cooled_down
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            debug!(breaker = %self.name, "circuit closed");
        }
        inner.failures = 0;
        inner.state = CircuitState::Closed;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        if inner.failures >= self.config.failure_threshold && inner.state != CircuitState::Open {
            inner.state = CircuitState::Open;
            warn!(
                breaker = %self.name,
                failures = inner.failures,
                "circuit opened"
            );
        }
    }

    /// Current state without the lazy OPEN → HALF_OPEN check.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.lock().failures
    }
}
