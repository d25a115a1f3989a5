//! Observation recording for probe operations

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use quarry_client::ReportKind;
use std::fmt;
use std::time::Duration;

/// The probe operations the pipeline issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeOp {
    Labels,
    Values,
    ProfileTypes,
    Range,
    Single,
    Merge,
}

impl ProbeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOp::Labels => "labels",
            ProbeOp::Values => "values",
            ProbeOp::ProfileTypes => "profile_types",
            ProbeOp::Range => "range",
            ProbeOp::Single => "single",
            ProbeOp::Merge => "merge",
        }
    }
}

impl fmt::Display for ProbeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional dimensions attached to an observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dimensions {
    /// Report encoding, for single and merge queries
    pub report: Option<ReportKind>,
    /// Window size, for range and merge queries
    pub window: Option<Duration>,
}

impl Dimensions {
    fn report_label(&self) -> &'static str {
        self.report.map(|r| r.as_str()).unwrap_or("")
    }

    fn window_label(&self) -> String {
        self.window
            .map(|w| humantime::format_duration(w).to_string())
            .unwrap_or_default()
    }
}

/// Where the querier reports one observation per issued request:
/// the operation, its outcome code, its dimensions, and how long the
/// final attempt took.
pub trait ObservationSink: Send + Sync {
    fn observe(&self, op: ProbeOp, code: &str, dims: &Dimensions, latency: Duration);
}

/// Sink that drops every observation.
pub struct NoopSink;

impl ObservationSink for NoopSink {
    fn observe(&self, _op: ProbeOp, _code: &str, _dims: &Dimensions, _latency: Duration) {}
}

/// Prometheus-backed sink: one latency histogram per operation plus a
/// request counter across all of them.
pub struct PrometheusSink {
    labels: HistogramVec,
    values: HistogramVec,
    profile_types: HistogramVec,
    range: HistogramVec,
    query: HistogramVec,
    requests: IntCounterVec,
}

impl PrometheusSink {
    /// Build and register all collectors against `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let labels = HistogramVec::new(
            HistogramOpts::new(
                "quarry_client_labels_seconds",
                "The seconds it takes to make Labels requests against the query service",
            )
            .buckets(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7,
                0.8, 0.9, 1.0,
            ]),
            &["code"],
        )?;

        let values = HistogramVec::new(
            HistogramOpts::new(
                "quarry_client_values_seconds",
                "The seconds it takes to make Values requests against the query service",
            )
            .buckets(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7,
                0.8, 0.9, 1.0, 1.25, 1.5, 1.75, 2.0, 3.0, 4.0, 5.0,
            ]),
            &["code"],
        )?;

        let profile_types = HistogramVec::new(
            HistogramOpts::new(
                "quarry_client_profiletypes_seconds",
                "The seconds it takes to make ProfileTypes requests against the query service",
            )
            .buckets(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7,
                0.8, 0.9, 1.0, 2.0, 3.0, 4.0, 5.0,
            ]),
            &["code"],
        )?;

        let range = HistogramVec::new(
            HistogramOpts::new(
                "quarry_client_queryrange_seconds",
                "The seconds it takes to make QueryRange requests against the query service",
            )
            .buckets(vec![
                0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.25, 1.5, 1.75, 2.0, 2.5,
                3.0, 3.5, 4.0, 4.5, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0,
            ]),
            &["code", "range"],
        )?;

        let query = HistogramVec::new(
            HistogramOpts::new(
                "quarry_client_query_seconds",
                "The seconds it takes to make Query requests against the query service",
            )
            .buckets(exponential_buckets_range(0.1, 120.0, 30)),
            &["mode", "code", "report_type", "range"],
        )?;

        let requests = IntCounterVec::new(
            Opts::new(
                "quarry_client_requests_total",
                "Total probe requests issued against the query service",
            ),
            &["operation", "code"],
        )?;

        registry.register(Box::new(labels.clone()))?;
        registry.register(Box::new(values.clone()))?;
        registry.register(Box::new(profile_types.clone()))?;
        registry.register(Box::new(range.clone()))?;
        registry.register(Box::new(query.clone()))?;
        registry.register(Box::new(requests.clone()))?;

        Ok(Self {
            labels,
            values,
            profile_types,
            range,
            query,
            requests,
        })
    }
}

impl ObservationSink for PrometheusSink {
    fn observe(&self, op: ProbeOp, code: &str, dims: &Dimensions, latency: Duration) {
        let seconds = latency.as_secs_f64();
        match op {
            ProbeOp::Labels => self.labels.with_label_values(&[code]).observe(seconds),
            ProbeOp::Values => self.values.with_label_values(&[code]).observe(seconds),
            ProbeOp::ProfileTypes => {
                self.profile_types.with_label_values(&[code]).observe(seconds)
            }
            ProbeOp::Range => self
                .range
                .with_label_values(&[code, &dims.window_label()])
                .observe(seconds),
            ProbeOp::Single => self
                .query
                .with_label_values(&["single", code, dims.report_label(), ""])
                .observe(seconds),
            ProbeOp::Merge => self
                .query
                .with_label_values(&["merge", code, dims.report_label(), &dims.window_label()])
                .observe(seconds),
        }
        self.requests
            .with_label_values(&[op.as_str(), code])
            .inc();
    }
}

/// `count` buckets spaced exponentially so the first is `min` and the
/// last is `max`.
fn exponential_buckets_range(min: f64, max: f64, count: usize) -> Vec<f64> {
    let factor = (max / min).powf(1.0 / (count - 1) as f64);
    (0..count).map(|i| min * factor.powi(i as i32)).collect()
}
