//! Wall-clock seam for query window derivation
//!
//! Probe windows are derived from "now"; injecting the clock keeps
//! window derivation deterministic under test instead of scattering
//! ambient `Utc::now()` calls through the pipeline.

use chrono::{DateTime, Utc};

/// Source of wall-clock timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
