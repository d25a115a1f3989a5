//! Backoff shapes for the retry policy

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay between attempts grows.
///
/// The raw delay produced here is capped and jittered by the owning
/// [`RetryPolicy`](crate::RetryPolicy).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every attempt.
    Fixed,

    /// `initial * attempt`.
    Linear,

    /// `initial * base^(attempt-1)`.
    Exponential {
        /// Growth factor, e.g. 2.0 for doubling.
        base: f64,
    },
}

impl BackoffStrategy {
    /// Raw (uncapped, unjittered) delay before retrying `attempt`
    /// (1-indexed: the delay after the first failure is attempt 1).
    pub fn raw_delay(&self, initial: Duration, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Linear => initial * attempt,
            BackoffStrategy::Exponential { base } => {
                if attempt == 0 {
                    return Duration::ZERO;
                }
                let multiplier = base.powi(attempt as i32 - 1);
                Duration::from_nanos((initial.as_nanos() as f64 * multiplier) as u64)
            }
        }
    }
}

/// Spread a delay by ±20% so concurrent probers don't retry in
/// lockstep against an upstream that just came back.
pub(crate) fn jittered(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_nanos((delay.as_nanos() as f64 * factor) as u64)
}
