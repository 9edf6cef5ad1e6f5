//! Bounded exponential backoff around one model's provider call.

use std::{future::Future, time::Duration};

use {
    tokio::time::Instant,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::{
    breaker::CircuitBreaker,
    error::{ConfigError, ErrorKind, ProviderError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::TooSmall {
                field: "max_attempts",
                min: 1,
                value: 0,
            });
        }
        if max_delay < base_delay {
            return Err(ConfigError::DelayRange {
                base: base_delay.as_millis() as u64,
                max: max_delay.as_millis() as u64,
            });
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
        })
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt` (1-based): zero for the first attempt,
    /// then `min(base * 2^(attempt - 2), max)`.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Success value, or the last error observed.
    pub result: Result<T, ProviderError>,
    /// Attempts actually started.
    pub attempts: u32,
    pub latency: Duration,
}

/// Run `op` up to `policy.max_attempts()` times.
///
/// Every failed attempt is reported to `breaker` before the next one starts,
/// every success closes it. A non-retryable error ends the loop at once.
/// Cancellation interrupts both the backoff sleep and the running attempt and
/// leaves the breaker untouched. The breaker is not re-checked between
/// attempts.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    cancel: &CancellationToken,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let start = Instant::now();
    let mut attempts = 0;
    let mut last_error = ProviderError::new(ErrorKind::Unknown, "no attempt was made");

    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            debug!(
                breaker = %breaker.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "backing off before retry"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    last_error = ProviderError::cancelled();
                    break;
                },
                () = tokio::time::sleep(delay) => {},
            }
        }

        // `op` is only invoked, and the attempt only counted, while the
        // token is still live.
        if cancel.is_cancelled() {
            last_error = ProviderError::cancelled();
            break;
        }
        attempts = attempt;
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ProviderError::cancelled()),
            r = op(attempt) => r,
        };

        match outcome {
            Ok(value) => {
                breaker.record_success();
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                    latency: start.elapsed(),
                };
            },
            Err(err) if err.kind == ErrorKind::Cancelled => {
                last_error = err;
                break;
            },
            Err(err) => {
                breaker.record_failure();
                warn!(
                    breaker = %breaker.name(),
                    attempt,
                    kind = %err.kind,
                    retryable = err.retryable,
                    error = %err.message,
                    "attempt failed"
                );
                let retryable = err.retryable;
                last_error = err;
                if !retryable {
                    break;
                }
            },
        }
    }

    RetryOutcome {
        result: Err(last_error),
        attempts,
        latency: start.elapsed(),
    }
}
