//! Bounded retry with exponential backoff.
//!
//! | Failed attempts | Wait before next attempt (base 100ms) |
//! |-----------------|---------------------------------------|
//! | 1               | 200ms                                 |
//! | 2               | 400ms                                 |
//! | 3               | exhausted with the default policy     |
//!
//! The exponent is applied after the attempt counter is incremented, so the
//! first retry already waits twice the base delay.

use tokio_util::sync::CancellationToken;
use crate::backend::BackendError;
use crate::core::{GatewayError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Attempts allowed for one logical call, the first one included.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Wait after `failed_attempts` transient failures: `base * 2^failed_attempts`.
    pub fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(failed_attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Total wait spent before attempt `k + 1` when the first `k` attempts failed.
    pub fn cumulative_backoff(&self, failed_attempts: u32) -> Duration {
        (1..=failed_attempts)
            .map(|attempt| self.backoff_delay(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max retry attempts must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRY_ATTEMPTS, BASE_RETRY_DELAY)
    }
}

/// Outcome of one failed attempt, as seen by the retry loop.
#[derive(Debug)]
pub enum AttemptError {
    /// Worth trying again.
    Transient(BackendError),
    /// Surface immediately.
    Abort(GatewayError),
}

/// Per-call retry bookkeeping.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    last_error: Option<BackendError>,
}

impl RetryState {
    fn last_message(&self) -> String {
        self.last_error
            .as_ref()
            .map(|e| e.message().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive `attempt` until it succeeds, aborts, or the budget is spent.
    ///
    /// `attempt` receives the 1-based attempt number. Backoff waits race
    /// against `cancel`; a cancelled wait ends the call with
    /// [`GatewayError::Interrupted`] without consuming an attempt.
    pub async fn run<T, F, Fut>(
        &self,
        signature: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let mut state = RetryState::default();

        loop {
            debug!(signature, attempt = state.attempt + 1, "dispatching attempt");

            let err = match attempt(state.attempt + 1).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Abort(e)) => return Err(e),
                Err(AttemptError::Transient(e)) => e,
            };

            state.attempt += 1;

            if state.attempt >= self.policy.max_attempts {
                error!(
                    signature,
                    attempts = state.attempt,
                    error = %err,
                    "all database retry attempts failed"
                );
                return Err(GatewayError::RetriesExhausted {
                    signature: signature.to_string(),
                    attempts: state.attempt,
                    last_error: err.message().to_string(),
                });
            }

            let delay = self.policy.backoff_delay(state.attempt);
            warn!(
                signature,
                attempt = state.attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "database call failed, retrying"
            );
            state.last_error = Some(err);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(signature, attempts = state.attempt, "retry backoff interrupted");
                    return Err(GatewayError::Interrupted {
                        signature: signature.to_string(),
                        attempts: state.attempt,
                        last_error: state.last_message(),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
