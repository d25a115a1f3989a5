//! Probe pipeline configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive_duration, Validatable};
use quarry_client::ReportKind;
use quarry_resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cadence, query shapes, and state lifetimes of the probe pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Polling interval of the probe pipeline
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Time-range buckets exercised by range and merge queries,
    /// ascending
    #[serde(with = "crate::domains::utils::serde_duration_vec")]
    pub time_ranges: Vec<Duration>,

    /// Report encodings exercised by single and merge queries
    pub report_kinds: Vec<ReportKind>,

    /// Explicit profile-type keys to query. Empty means discover
    /// dynamically from the service.
    pub profile_types: Vec<String>,

    /// Explicit label names for values probing. Empty means discover
    /// dynamically from the service.
    pub labels: Vec<String>,

    /// Lifetime of discovered label names and profile types
    #[serde(with = "humantime_serde")]
    pub discovery_ttl: Duration,

    /// Lifetime of discovered series descriptors
    #[serde(with = "humantime_serde")]
    pub series_ttl: Duration,

    /// Backoff tuning for per-operation retries. The elapsed-time
    /// budget is always the polling interval; see [`retry_policy`].
    ///
    /// [`retry_policy`]: ProbeConfig::retry_policy
    pub retry: RetryPolicy,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            time_ranges: default_time_ranges(),
            report_kinds: vec![
                ReportKind::Flamegraph,
                ReportKind::FlamegraphTable,
                ReportKind::Pprof,
            ],
            profile_types: Vec::new(),
            labels: Vec::new(),
            discovery_ttl: Duration::from_secs(60),
            series_ttl: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_time_ranges() -> Vec<Duration> {
    vec![
        Duration::from_secs(15 * 60),
        Duration::from_secs(12 * 60 * 60),
        Duration::from_secs(7 * 24 * 60 * 60),
    ]
}

impl ProbeConfig {
    /// The retry policy probe operations run under, with its
    /// elapsed-time budget pinned to the polling interval so retries
    /// for one tick never run into the next.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            budget: self.interval,
            ..self.retry.clone()
        }
    }

    /// Report kinds with the flamegraph pair normalized: the two
    /// flamegraph encodings answer the same query, so selecting either
    /// exercises both to keep their latencies comparable.
    pub fn normalized_report_kinds(&self) -> Vec<ReportKind> {
        let mut kinds = self.report_kinds.clone();
        if kinds.iter().any(|kind| kind.is_flamegraph()) {
            for kind in [ReportKind::Flamegraph, ReportKind::FlamegraphTable] {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
        }
        kinds
    }
}

impl Validatable for ProbeConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive_duration(self.interval, "interval", self.domain_name())?;

        if self.time_ranges.is_empty() {
            return Err(self.validation_error("time_ranges cannot be empty"));
        }
        for pair in self.time_ranges.windows(2) {
            if pair[0] >= pair[1] {
                return Err(self.validation_error("time_ranges must be strictly ascending"));
            }
        }

        if self.report_kinds.is_empty() {
            return Err(self.validation_error("report_kinds cannot be empty"));
        }

        if self.discovery_ttl < self.interval {
            return Err(
                self.validation_error("discovery_ttl must be at least one polling interval")
            );
        }
        if self.series_ttl < self.interval {
            return Err(self.validation_error("series_ttl must be at least one polling interval"));
        }

        validate_positive_duration(self.retry.initial_delay, "retry.initial_delay", self.domain_name())?;
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(self.validation_error("retry.max_delay must be >= retry.initial_delay"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "probe"
    }
}
