//! Shared retry-with-backoff policy.
//!
//! Every outbound service call (citation resolution, PDF download, species
//! extraction) goes through [`RetryPolicy::run`]. Only errors for which
//! [`RefSpeciesError::is_transient`] holds are retried; permanent errors are
//! returned on the spot.

use crate::error::{RefSpeciesError, Result, TransientKind};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied after every retry
    pub multiplier: f64,
    /// Upper bound for a single delay (also caps Retry-After hints)
    pub max_delay: Duration,
    /// Deadline for a single attempt
    pub attempt_timeout: Duration,
    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            attempt_timeout: Duration::from_secs(5),
            jitter: false,
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let secs = self.initial_delay.as_secs_f64() * exp;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each attempt is bounded by `attempt_timeout`; an elapsed deadline counts
    /// as a transient timeout. After exhaustion the last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(self.attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(RefSpeciesError::Transient(TransientKind::Timeout)),
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                return Err(error);
            }

            if attempt >= attempts {
                warn!(label, attempts = attempt, error = %error, "Retries exhausted");
                return Err(error);
            }

            let mut wait = self.delay_for(attempt);
            if let Some(hint) = error.retry_after() {
                wait = wait.max(hint.min(self.max_delay));
            }
            if self.jitter && !wait.is_zero() {
                let extra = rand::thread_rng().gen_range(0.0..0.25);
                wait = wait.mul_f64(1.0 + extra);
            }

            warn!(
                label,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "Transient failure, backing off"
            );
            tokio::time::sleep(wait).await;
        }
    }
}
