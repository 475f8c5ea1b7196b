//! Bounded retry policy for model calls.
//!
//! A [`RetryPolicy`] runs an async operation until it succeeds or the attempt
//! ceiling is reached. The default retries immediately; a fixed delay between
//! attempts can be configured.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Attempt ceiling for reviewer calls.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Wait between a failed attempt and the next one.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub enum CallOutcome<T, E> {
    Success { value: T, attempts: u32 },
    /// Every attempt failed. `last_error` is the final failure.
    Exhausted { attempts: u32, last_error: E },
}

impl<T, E> CallOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            CallOutcome::Success { attempts, .. } | CallOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    pub fn value(self) -> Option<T> {
        match self {
            CallOutcome::Success { value, .. } => Some(value),
            CallOutcome::Exhausted { .. } => None,
        }
    }
}

impl RetryPolicy {
    /// Retry without waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn ceiling(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `op` until it succeeds or the ceiling is reached.
    ///
    /// `op` receives the 1-based attempt number. Failures are logged at warn
    /// level and never propagated; the caller inspects the [`CallOutcome`].
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> CallOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let ceiling = self.ceiling();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return CallOutcome::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    tracing::warn!(attempt, max_attempts = ceiling, error = %err, "attempt failed");
                    if attempt >= ceiling {
                        return CallOutcome::Exhausted {
                            attempts: attempt,
                            last_error: err,
                        };
                    }
                }
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            attempt += 1;
        }
    }
}
