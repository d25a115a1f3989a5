//! Resilience building blocks for the Quarry prober
//!
//! Two concerns live here: retrying probe operations under an
//! elapsed-time budget, and a broadcast shutdown signal that every
//! loop, sleep, and in-flight call observes.

pub mod backoff;
pub mod retry;
pub mod shutdown;

pub use backoff::BackoffStrategy;
pub use retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
pub use shutdown::{ShutdownController, ShutdownToken};
