//! Deadline-bounded retry around probe operations

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::backoff::{jittered, BackoffStrategy};
use crate::shutdown::ShutdownToken;

/// Retry policy bounded by an elapsed-time budget rather than an
/// attempt count.
///
/// The budget is sized to the polling interval of the operation being
/// wrapped, so retries for one tick never run into the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Ceiling for any single backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Elapsed-time budget across all attempts and backoff sleeps
    #[serde(with = "humantime_serde")]
    pub budget: Duration,

    /// Backoff shape
    pub backoff_strategy: BackoffStrategy,

    /// Whether to add jitter to retry delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            budget: Duration::from_secs(10),
            backoff_strategy: BackoffStrategy::Exponential { base: 2.0 },
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying `attempt` (1-indexed), capped and
    /// jittered per the policy.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.backoff_strategy.raw_delay(self.initial_delay, attempt);
        let capped = raw.min(self.max_delay);
        if self.jitter {
            jittered(capped)
        } else {
            capped
        }
    }
}

/// Errors that know whether retrying can help.
pub trait Retryable {
    /// Whether this error is worth another attempt.
    fn is_retryable(&self) -> bool;
}

/// Why a retried operation ultimately failed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The elapsed-time budget ran out.
    #[error("retry budget of {budget:?} exhausted after {attempts} attempts: {last_error}")]
    BudgetExhausted {
        budget: Duration,
        attempts: u32,
        last_error: E,
    },

    /// The error was not worth retrying.
    #[error("non-retryable error: {0}")]
    NonRetryable(E),

    /// Shutdown was signalled mid-attempt or mid-backoff.
    #[error("operation cancelled by shutdown")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying operation error, if one was observed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::BudgetExhausted { last_error, .. } => Some(last_error),
            RetryError::NonRetryable(error) => Some(error),
            RetryError::Cancelled => None,
        }
    }

    /// Whether this failure was a shutdown, not an upstream problem.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}

/// Executes operations under a [`RetryPolicy`].
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `f`, retrying retryable failures with backoff until the
    /// policy's elapsed-time budget would be exceeded.
    ///
    /// Every suspension point (the attempt itself and the backoff
    /// sleep) also watches `shutdown` and returns
    /// [`RetryError::Cancelled`] promptly when it fires.
    pub async fn execute<F, Fut, T, E>(
        &self,
        shutdown: &ShutdownToken,
        mut f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut shutdown = shutdown.clone();
        let started = Instant::now();
        let mut attempt = 1u32;

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => return Err(RetryError::Cancelled),
                result = f() => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(RetryError::NonRetryable(error));
            }

            let delay = self.policy.delay_for_attempt(attempt);
            if started.elapsed() + delay >= self.policy.budget {
                warn!(
                    attempts = attempt,
                    budget = ?self.policy.budget,
                    error = %error,
                    "retry budget exhausted"
                );
                return Err(RetryError::BudgetExhausted {
                    budget: self.policy.budget,
                    attempts: attempt,
                    last_error: error,
                });
            }

            debug!(attempt, delay = ?delay, error = %error, "attempt failed, backing off");
            tokio::select! {
                _ = shutdown.cancelled() => return Err(RetryError::Cancelled),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
