//! Bounded retry with exponential backoff.
//!
//! Only failures classified as retryable by [`Error::is_retryable`] are
//! retried, and only when the caller marks the operation idempotent.
//!
//! ```text
//! attempt 1 ── fail ── sleep(base) ── attempt 2 ── fail ── sleep(2·base) ── attempt 3
//!                                                           (capped at max_delay)
//! ```
//!
//! # Usage
//!
//! ```rust
//! use lingshu::storage::retry::{Idempotency, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let value = policy.run("ping", Idempotency::Idempotent, || Ok::<_, lingshu::Error>(42))?;
//! assert_eq!(value, 42);
//! # Ok::<(), lingshu::Error>(())
//! ```

use crate::{Error, Result};
use std::time::Duration;

/// Whether an operation may safely run more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Repeating the operation has the same effect as running it once.
    Idempotent,
    /// Repeating the operation could duplicate its effect. Never retried.
    NonIdempotent,
}

/// Retry policy for backend calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Loads the retry policy from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `LINGSHU_RETRY_MAX_ATTEMPTS` | `max_attempts` (min 1) |
    /// | `LINGSHU_RETRY_BASE_DELAY_MS` | `base_delay` |
    /// | `LINGSHU_RETRY_MAX_DELAY_MS` | `max_delay` |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("LINGSHU_RETRY_MAX_ATTEMPTS")
            && let Ok(parsed) = v.parse::<u32>()
        {
            self.max_attempts = parsed.max(1);
        }
        if let Ok(v) = std::env::var("LINGSHU_RETRY_BASE_DELAY_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.base_delay = Duration::from_millis(parsed);
        }
        if let Ok(v) = std::env::var("LINGSHU_RETRY_MAX_DELAY_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.max_delay = Duration::from_millis(parsed);
        }
        self
    }

    /// Sets the maximum number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `call`.
    pub fn run<T, F>(&self, operation: &'static str, idempotency: Idempotency, mut call: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let max_attempts = match idempotency {
            Idempotency::Idempotent => self.max_attempts.max(1),
            Idempotency::NonIdempotent => 1,
        };

        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && err.is_retryable() => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying after retryable failure"
                    );
                    metrics::counter!("graph_retries_total", "operation" => operation)
                        .increment(1);
                    std::thread::sleep(delay);
                    attempt += 1;
                },
                Err(err) => return Err(err),
            }
        }
    }
}

/// Convenience for classifying an error without a policy in hand.
#[must_use]
pub const fn is_retryable(err: &Error) -> bool {
    err.is_retryable()
}
