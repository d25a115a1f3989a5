//! The probe capability the querier drives

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::errors::ClientError;
use crate::types::{ProfileType, RangeSeries, ReportKind, TimeWindow};

/// Operations the querier issues against the profiling query service.
///
/// Implementations resolve within their configured per-call deadline,
/// returning either a typed result or a classified [`ClientError`].
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Label names with data, optionally restricted to a window.
    async fn labels(&self, window: Option<TimeWindow>) -> Result<Vec<String>, ClientError>;

    /// Values observed for one label name inside the window.
    async fn label_values(
        &self,
        name: &str,
        window: TimeWindow,
    ) -> Result<Vec<String>, ClientError>;

    /// Profile types with data, optionally restricted to a window.
    async fn profile_types(
        &self,
        window: Option<TimeWindow>,
    ) -> Result<Vec<ProfileType>, ClientError>;

    /// Per-series metric samples for `query` over the window at the
    /// given sample resolution.
    async fn query_range(
        &self,
        query: &str,
        window: TimeWindow,
        step: Duration,
    ) -> Result<Vec<RangeSeries>, ClientError>;

    /// Render the report for `query` at one instant. The report body
    /// is decoded and discarded; only outcome and latency matter to
    /// the prober.
    async fn query_single(
        &self,
        query: &str,
        instant: DateTime<Utc>,
        report: ReportKind,
    ) -> Result<(), ClientError>;

    /// Merge all samples for `query` across the window into one
    /// report, trimming nodes below `trim_threshold`.
    async fn query_merge(
        &self,
        query: &str,
        window: TimeWindow,
        report: ReportKind,
        trim_threshold: f32,
    ) -> Result<(), ClientError>;
}
