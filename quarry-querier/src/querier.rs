//! The probe pipeline
//!
//! Every polling tick runs a fixed sequence of operations against the
//! query service: list labels, list values for one label, list profile
//! types, range queries per time bucket, a single-point report per
//! report kind, and merge reports per covered bucket. Discovery
//! results flow to the dependent operations through expiring caches,
//! so a backend that stops answering discovery also stops receiving
//! dependent queries once the cached state ages out.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use quarry_cache::ExpiringCache;
use quarry_client::{
    ClientError, QueryService, ReportKind, TimeWindow, CODE_OK,
};
use quarry_config::ProbeConfig;
use quarry_resilience::{RetryError, RetryExecutor, ShutdownToken};

use crate::clock::Clock;
use crate::metrics::{Dimensions, ObservationSink, ProbeOp};

/// Horizontal pixels on an 8K display. Range steps and the merge trim
/// threshold are both sized against it so result sizes stay bounded
/// no matter how long the requested window is.
pub const PIXEL_BUDGET: u32 = 7680;

const NODE_TRIM_THRESHOLD: f32 = 1.0 / PIXEL_BUDGET as f32;

/// Trailing window used for discovery and values queries.
const DISCOVERY_WINDOW: Duration = Duration::from_secs(60 * 60);

/// First and last sample timestamps observed for one series in the
/// most recent range query covering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesSpan {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

impl SeriesSpan {
    /// Length of the observed span, zero if degenerate.
    pub fn length(&self) -> Duration {
        (self.last - self.first).to_std().unwrap_or_default()
    }
}

/// Drives the probe pipeline against one query service.
pub struct Querier {
    client: Arc<dyn QueryService>,
    sink: Arc<dyn ObservationSink>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    retry: RetryExecutor,

    interval: Duration,
    time_ranges: Vec<Duration>,
    report_kinds: Vec<ReportKind>,
    label_allowlist: Vec<String>,
    profile_type_allowlist: Vec<String>,

    labels: ExpiringCache<String, ()>,
    profile_types: ExpiringCache<String, ()>,
    series: ExpiringCache<String, SeriesSpan>,
}

impl Querier {
    pub fn new(
        client: Arc<dyn QueryService>,
        sink: Arc<dyn ObservationSink>,
        clock: Arc<dyn Clock>,
        probe: &ProbeConfig,
    ) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            retry: RetryExecutor::new(probe.retry_policy()),
            interval: probe.interval,
            time_ranges: probe.time_ranges.clone(),
            report_kinds: probe.normalized_report_kinds(),
            label_allowlist: probe.labels.clone(),
            profile_type_allowlist: probe.profile_types.clone(),
            labels: ExpiringCache::new(probe.discovery_ttl),
            profile_types: ExpiringCache::new(probe.discovery_ttl),
            series: ExpiringCache::new(probe.series_ttl),
            client,
            sink,
            clock,
        }
    }

    /// Run probe ticks until `shutdown` fires.
    ///
    /// An overrunning tick skips missed firings instead of bursting to
    /// catch up. Returns once the current tick has observed the
    /// signal, so the caller's join is the end of all probe activity.
    pub async fn run(mut self, shutdown: ShutdownToken) {
        let mut shutdown_wait = shutdown.clone();
        let first = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(first, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval = ?self.interval, "querier started");
        loop {
            tokio::select! {
                _ = shutdown_wait.cancelled() => {
                    info!("querier stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick(&shutdown).await;
                }
            }
        }
    }

    /// One full probe pass, in dependency order.
    ///
    /// Dependent operations consume whatever discovery is cached from
    /// this or an earlier pass; with nothing cached they skip rather
    /// than fail. A probe failure never aborts the remaining
    /// operations, only shutdown does.
    pub async fn tick(&mut self, shutdown: &ShutdownToken) {
        self.query_labels(shutdown).await;
        if shutdown.is_cancelled() {
            return;
        }
        self.query_values(shutdown).await;
        if shutdown.is_cancelled() {
            return;
        }
        self.query_profile_types(shutdown).await;
        if shutdown.is_cancelled() {
            return;
        }
        self.query_range(shutdown).await;
        if shutdown.is_cancelled() {
            return;
        }
        self.query_single(shutdown).await;
        if shutdown.is_cancelled() {
            return;
        }
        self.query_merge(shutdown).await;
    }

    async fn query_labels(&mut self, shutdown: &ShutdownToken) {
        let window = TimeWindow::trailing(self.clock.now(), DISCOVERY_WINDOW);
        let client = Arc::clone(&self.client);
        let (result, latency) = self
            .call_with_retry(shutdown, || {
                let client = Arc::clone(&client);
                async move { client.labels(Some(window)).await }
            })
            .await;

        let dims = Dimensions::default();
        match result {
            Ok(names) => {
                self.sink.observe(ProbeOp::Labels, CODE_OK, &dims, latency);
                debug!(elapsed = ?latency, results = names.len(), "labels request completed");
                for name in names {
                    self.labels.store(name, ());
                }
            }
            Err(error) => self.record_failure(ProbeOp::Labels, &dims, latency, &error),
        }
    }

    async fn query_values(&mut self, shutdown: &ShutdownToken) {
        let Some(label) = self.pick_label() else {
            debug!("values: no labels discovered yet");
            return;
        };

        let window = TimeWindow::trailing(self.clock.now(), DISCOVERY_WINDOW);
        let client = Arc::clone(&self.client);
        let name = label.clone();
        let (result, latency) = self
            .call_with_retry(shutdown, || {
                let client = Arc::clone(&client);
                let name = name.clone();
                async move { client.label_values(&name, window).await }
            })
            .await;

        let dims = Dimensions::default();
        match result {
            Ok(values) => {
                self.sink.observe(ProbeOp::Values, CODE_OK, &dims, latency);
                debug!(
                    label = %label,
                    elapsed = ?latency,
                    results = values.len(),
                    "values request completed"
                );
            }
            Err(error) => self.record_failure(ProbeOp::Values, &dims, latency, &error),
        }
    }

    async fn query_profile_types(&mut self, shutdown: &ShutdownToken) {
        let window = TimeWindow::trailing(self.clock.now(), DISCOVERY_WINDOW);
        let client = Arc::clone(&self.client);
        let (result, latency) = self
            .call_with_retry(shutdown, || {
                let client = Arc::clone(&client);
                async move { client.profile_types(Some(window)).await }
            })
            .await;

        let dims = Dimensions::default();
        match result {
            Ok(types) => {
                self.sink
                    .observe(ProbeOp::ProfileTypes, CODE_OK, &dims, latency);
                debug!(elapsed = ?latency, results = types.len(), "profile types request completed");
                if types.is_empty() {
                    debug!("profile types: none reported");
                }
                for profile_type in &types {
                    self.profile_types.store(profile_type.key(), ());
                }
            }
            Err(error) => self.record_failure(ProbeOp::ProfileTypes, &dims, latency, &error),
        }
    }

    async fn query_range(&mut self, shutdown: &ShutdownToken) {
        let Some(profile_type) = self.pick_profile_type() else {
            debug!("range: no profile types discovered yet");
            return;
        };

        for bucket in self.time_ranges.clone() {
            let window = TimeWindow::trailing(self.clock.now(), bucket);
            let step = bucket / PIXEL_BUDGET;
            let client = Arc::clone(&self.client);
            let query = profile_type.clone();
            let (result, latency) = self
                .call_with_retry(shutdown, || {
                    let client = Arc::clone(&client);
                    let query = query.clone();
                    async move { client.query_range(&query, window, step).await }
                })
                .await;

            let dims = Dimensions {
                window: Some(bucket),
                ..Default::default()
            };
            match result {
                Ok(series_list) => {
                    self.sink.observe(ProbeOp::Range, CODE_OK, &dims, latency);
                    debug!(
                        query = %profile_type,
                        over = ?bucket,
                        elapsed = ?latency,
                        series = series_list.len(),
                        "range request completed"
                    );
                    for series in series_list {
                        // A span needs two samples to anchor dependent
                        // point and merge queries.
                        if series.samples.len() < 2 {
                            continue;
                        }
                        let (Some(first), Some(last)) =
                            (series.samples.first(), series.samples.last())
                        else {
                            continue;
                        };
                        self.series.store(
                            format!("{profile_type}{}", series.labels),
                            SeriesSpan {
                                first: first.timestamp,
                                last: last.timestamp,
                            },
                        );
                    }
                }
                Err(error) => {
                    self.record_failure(ProbeOp::Range, &dims, latency, &error);
                    if error.is_cancelled() {
                        return;
                    }
                }
            }
        }
    }

    async fn query_single(&mut self, shutdown: &ShutdownToken) {
        let Some((series_key, span)) = self.pick_series() else {
            debug!("single: no series discovered yet");
            return;
        };

        for report in self.report_kinds.clone() {
            let client = Arc::clone(&self.client);
            let query = series_key.clone();
            let instant = span.first;
            let (result, latency) = self
                .call_with_retry(shutdown, || {
                    let client = Arc::clone(&client);
                    let query = query.clone();
                    async move { client.query_single(&query, instant, report).await }
                })
                .await;

            let dims = Dimensions {
                report: Some(report),
                ..Default::default()
            };
            match result {
                Ok(()) => {
                    self.sink.observe(ProbeOp::Single, CODE_OK, &dims, latency);
                    debug!(
                        query = %series_key,
                        report = %report,
                        elapsed = ?latency,
                        "single request completed"
                    );
                }
                Err(error) => {
                    self.record_failure(ProbeOp::Single, &dims, latency, &error);
                    if error.is_cancelled() {
                        return;
                    }
                }
            }
        }
    }

    async fn query_merge(&mut self, shutdown: &ShutdownToken) {
        let Some((series_key, span)) = self.pick_series() else {
            debug!("merge: no series discovered yet");
            return;
        };

        let observed = span.length();
        for bucket in self.time_ranges.clone() {
            // Only merge over windows the series actually covers; a
            // query against insufficient history proves nothing.
            if observed < bucket {
                debug!(
                    query = %series_key,
                    over = ?bucket,
                    observed = ?observed,
                    "merge: skipping bucket without enough history"
                );
                continue;
            }

            let window = TimeWindow::trailing(span.last, bucket);
            for report in self.report_kinds.clone() {
                let client = Arc::clone(&self.client);
                let query = series_key.clone();
                let (result, latency) = self
                    .call_with_retry(shutdown, || {
                        let client = Arc::clone(&client);
                        let query = query.clone();
                        async move {
                            client
                                .query_merge(&query, window, report, NODE_TRIM_THRESHOLD)
                                .await
                        }
                    })
                    .await;

                let dims = Dimensions {
                    report: Some(report),
                    window: Some(bucket),
                };
                match result {
                    Ok(()) => {
                        self.sink.observe(ProbeOp::Merge, CODE_OK, &dims, latency);
                        debug!(
                            query = %series_key,
                            report = %report,
                            over = ?bucket,
                            elapsed = ?latency,
                            "merge request completed"
                        );
                    }
                    Err(error) => {
                        self.record_failure(ProbeOp::Merge, &dims, latency, &error);
                        if error.is_cancelled() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Run one client call under the retry policy, reporting the
    /// latency of the final attempt.
    async fn call_with_retry<T, F, Fut>(
        &self,
        shutdown: &ShutdownToken,
        mut call: F,
    ) -> (Result<T, RetryError<ClientError>>, Duration)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let attempt_nanos = AtomicU64::new(0);
        let result = self
            .retry
            .execute(shutdown, || {
                let fut = call();
                let attempt_nanos = &attempt_nanos;
                async move {
                    let started = tokio::time::Instant::now();
                    let result = fut.await;
                    attempt_nanos.store(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
                    result
                }
            })
            .await;
        (
            result,
            Duration::from_nanos(attempt_nanos.load(Ordering::Relaxed)),
        )
    }

    /// Record a failed observation, unless the failure was shutdown.
    fn record_failure(
        &self,
        op: ProbeOp,
        dims: &Dimensions,
        latency: Duration,
        error: &RetryError<ClientError>,
    ) {
        let code = match error {
            RetryError::NonRetryable(inner)
            | RetryError::BudgetExhausted {
                last_error: inner, ..
            } => inner.code().to_string(),
            RetryError::Cancelled => return,
        };
        self.sink.observe(op, &code, dims, latency);
        warn!(operation = %op, code = %code, error = %error, "probe request failed");
    }

    fn pick_label(&mut self) -> Option<String> {
        if !self.label_allowlist.is_empty() {
            pick(&mut self.rng, &self.label_allowlist)
        } else {
            let keys = self.labels.keys();
            pick(&mut self.rng, &keys)
        }
    }

    fn pick_profile_type(&mut self) -> Option<String> {
        if !self.profile_type_allowlist.is_empty() {
            pick(&mut self.rng, &self.profile_type_allowlist)
        } else {
            let keys = self.profile_types.keys();
            pick(&mut self.rng, &keys)
        }
    }

    /// One cached series descriptor, chosen uniformly from a key
    /// snapshot. The load can still miss if the entry expired between
    /// snapshot and lookup, which callers treat as nothing cached.
    fn pick_series(&mut self) -> Option<(String, SeriesSpan)> {
        let keys = self.series.keys();
        let key = pick(&mut self.rng, &keys)?;
        let span = self.series.load(&key)?;
        Some((key, span))
    }
}

/// Uniform choice from a snapshot of candidates.
fn pick<T: Clone>(rng: &mut StdRng, items: &[T]) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[rng.gen_range(0..items.len())].clone())
    }
}
