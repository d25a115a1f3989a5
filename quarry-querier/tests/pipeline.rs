//! End-to-end tests of the probe pipeline against a scripted service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quarry_client::{
    ClientError, Label, LabelSet, ProfileType, QueryService, RangeSeries, ReportKind, Sample,
    TimeWindow,
};
use quarry_config::ProbeConfig;
use quarry_querier::{
    Clock, Dimensions, NoopSink, ObservationSink, ProbeOp, Querier, PIXEL_BUDGET,
};
use quarry_resilience::ShutdownController;

#[derive(Debug, Clone)]
enum Call {
    Labels,
    Values { name: String },
    ProfileTypes,
    Range { window: TimeWindow, step: Duration },
    Single { query: String, instant: DateTime<Utc>, report: ReportKind },
    Merge { window: TimeWindow, report: ReportKind, trim: f32 },
}

/// Scripted query service: serves fixed discovery data, or fails every
/// call with an injected status code.
#[derive(Default)]
struct ScriptedService {
    labels: Vec<String>,
    profile_types: Vec<ProfileType>,
    series: Vec<RangeSeries>,
    fail_code: Mutex<Option<String>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedService {
    fn fail_with(&self, code: &str) {
        *self.fail_code.lock().unwrap() = Some(code.to_string());
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(call);
        match self.fail_code.lock().unwrap().as_ref() {
            Some(code) => Err(ClientError::Status {
                code: code.clone(),
                message: "injected failure".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl QueryService for ScriptedService {
    async fn labels(&self, _window: Option<TimeWindow>) -> Result<Vec<String>, ClientError> {
        self.record(Call::Labels)?;
        Ok(self.labels.clone())
    }

    async fn label_values(
        &self,
        name: &str,
        _window: TimeWindow,
    ) -> Result<Vec<String>, ClientError> {
        self.record(Call::Values {
            name: name.to_string(),
        })?;
        Ok(vec!["a".to_string(), "b".to_string()])
    }

    async fn profile_types(
        &self,
        _window: Option<TimeWindow>,
    ) -> Result<Vec<ProfileType>, ClientError> {
        self.record(Call::ProfileTypes)?;
        Ok(self.profile_types.clone())
    }

    async fn query_range(
        &self,
        _query: &str,
        window: TimeWindow,
        step: Duration,
    ) -> Result<Vec<RangeSeries>, ClientError> {
        self.record(Call::Range { window, step })?;
        Ok(self.series.clone())
    }

    async fn query_single(
        &self,
        query: &str,
        instant: DateTime<Utc>,
        report: ReportKind,
    ) -> Result<(), ClientError> {
        self.record(Call::Single {
            query: query.to_string(),
            instant,
            report,
        })
    }

    async fn query_merge(
        &self,
        _query: &str,
        window: TimeWindow,
        report: ReportKind,
        trim_threshold: f32,
    ) -> Result<(), ClientError> {
        self.record(Call::Merge {
            window,
            report,
            trim: trim_threshold,
        })
    }
}

/// Sink that keeps every observation for assertions.
#[derive(Default)]
struct RecordingSink {
    observations: Mutex<Vec<(ProbeOp, String, Option<ReportKind>, Option<Duration>)>>,
}

impl RecordingSink {
    fn with_op(&self, op: ProbeOp) -> Vec<(String, Option<ReportKind>, Option<Duration>)> {
        self.observations
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, ..)| *o == op)
            .map(|(_, code, report, window)| (code.clone(), *report, *window))
            .collect()
    }
}

impl ObservationSink for RecordingSink {
    fn observe(&self, op: ProbeOp, code: &str, dims: &Dimensions, _latency: Duration) {
        self.observations
            .lock()
            .unwrap()
            .push((op, code.to_string(), dims.report, dims.window));
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn ts(raw: &str) -> DateTime<Utc> {
    raw.parse().expect("test timestamp")
}

fn cpu_profile_type() -> ProfileType {
    ProfileType {
        name: "process_cpu".into(),
        sample_type: "cpu".into(),
        sample_unit: "nanoseconds".into(),
        period_type: "cpu".into(),
        period_unit: "nanoseconds".into(),
        delta: true,
    }
}

fn series_between(first: &str, last: &str) -> RangeSeries {
    RangeSeries {
        labels: LabelSet::new(vec![Label {
            name: "job".into(),
            value: "api".into(),
        }]),
        samples: vec![
            Sample {
                timestamp: ts(first),
                value: 100,
            },
            Sample {
                timestamp: ts(last),
                value: 200,
            },
        ],
    }
}

fn healthy_service(first: &str, last: &str) -> ScriptedService {
    ScriptedService {
        labels: vec!["job".to_string(), "env".to_string()],
        profile_types: vec![cpu_profile_type()],
        series: vec![series_between(first, last)],
        ..Default::default()
    }
}

fn querier_with(
    service: &Arc<ScriptedService>,
    sink: &Arc<RecordingSink>,
    now: DateTime<Utc>,
    probe: &ProbeConfig,
) -> Querier {
    let client: Arc<dyn QueryService> = service.clone();
    let sink: Arc<dyn ObservationSink> = sink.clone();
    Querier::new(client, sink, Arc::new(FixedClock(now)), probe)
}

#[tokio::test(start_paused = true)]
async fn range_issues_one_query_per_bucket_with_pixel_step() {
    let now = ts("2026-08-04T12:00:00Z");
    let service = Arc::new(healthy_service(
        "2026-08-04T11:00:00Z",
        "2026-08-04T11:30:00Z",
    ));
    let sink = Arc::new(RecordingSink::default());
    let mut querier = querier_with(&service, &sink, now, &ProbeConfig::default());
    let controller = ShutdownController::new();

    querier.tick(&controller.token()).await;

    let range_calls: Vec<(TimeWindow, Duration)> = service
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Range { window, step } => Some((window, step)),
            _ => None,
        })
        .collect();

    let buckets = [
        Duration::from_secs(15 * 60),
        Duration::from_secs(12 * 60 * 60),
        Duration::from_secs(7 * 24 * 60 * 60),
    ];
    assert_eq!(range_calls.len(), buckets.len());
    for ((window, step), bucket) in range_calls.into_iter().zip(buckets) {
        assert_eq!(window.end, now);
        assert_eq!(window.span(), bucket);
        assert_eq!(step, bucket / PIXEL_BUDGET);
    }
}

#[tokio::test(start_paused = true)]
async fn merge_skips_every_bucket_the_span_cannot_cover() {
    let now = ts("2026-08-04T12:00:00Z");
    // 10 minutes of observed samples against 15m and 12h buckets.
    let service = Arc::new(healthy_service(
        "2026-08-04T11:00:00Z",
        "2026-08-04T11:10:00Z",
    ));
    let sink = Arc::new(RecordingSink::default());
    let probe = ProbeConfig {
        time_ranges: vec![Duration::from_secs(15 * 60), Duration::from_secs(12 * 60 * 60)],
        ..Default::default()
    };
    let mut querier = querier_with(&service, &sink, now, &probe);
    let controller = ShutdownController::new();

    querier.tick(&controller.token()).await;

    let merges = service
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::Merge { .. }))
        .count();
    assert_eq!(merges, 0, "insufficient span must skip, not truncate");
    assert!(sink.with_op(ProbeOp::Merge).is_empty());
}

#[tokio::test(start_paused = true)]
async fn merge_anchors_covered_buckets_to_the_last_sample() {
    let now = ts("2026-08-04T12:00:00Z");
    // 13 hours of observed samples covers both 15m and 12h.
    let last = "2026-08-04T11:00:00Z";
    let service = Arc::new(healthy_service("2026-08-03T22:00:00Z", last));
    let sink = Arc::new(RecordingSink::default());
    let probe = ProbeConfig {
        time_ranges: vec![Duration::from_secs(15 * 60), Duration::from_secs(12 * 60 * 60)],
        report_kinds: vec![ReportKind::Pprof],
        ..Default::default()
    };
    let mut querier = querier_with(&service, &sink, now, &probe);
    let controller = ShutdownController::new();

    querier.tick(&controller.token()).await;

    let merge_calls: Vec<(TimeWindow, ReportKind, f32)> = service
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Merge {
                window,
                report,
                trim,
            } => Some((window, report, trim)),
            _ => None,
        })
        .collect();

    assert_eq!(merge_calls.len(), 2);
    for (window, report, trim) in merge_calls {
        assert_eq!(window.end, ts(last), "merge window ends at the last sample");
        assert_eq!(report, ReportKind::Pprof);
        assert!((trim - 1.0 / PIXEL_BUDGET as f32).abs() < f32::EPSILON);
    }
}

#[tokio::test(start_paused = true)]
async fn values_picks_exactly_one_discovered_label() {
    let now = ts("2026-08-04T12:00:00Z");
    let service = Arc::new(healthy_service(
        "2026-08-04T11:00:00Z",
        "2026-08-04T11:30:00Z",
    ));
    let sink = Arc::new(RecordingSink::default());
    let mut querier = querier_with(&service, &sink, now, &ProbeConfig::default());
    let controller = ShutdownController::new();

    querier.tick(&controller.token()).await;

    let values_calls: Vec<String> = service
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Values { name } => Some(name),
            _ => None,
        })
        .collect();

    assert_eq!(values_calls.len(), 1);
    assert!(
        values_calls[0] == "job" || values_calls[0] == "env",
        "picked label must come from discovery, got {}",
        values_calls[0]
    );
}

#[tokio::test(start_paused = true)]
async fn values_honors_the_configured_label_allowlist() {
    let now = ts("2026-08-04T12:00:00Z");
    // Discovery returns nothing; the allowlist drives values alone.
    let service = Arc::new(ScriptedService::default());
    let sink = Arc::new(RecordingSink::default());
    let probe = ProbeConfig {
        labels: vec!["instance".to_string()],
        ..Default::default()
    };
    let mut querier = querier_with(&service, &sink, now, &probe);
    let controller = ShutdownController::new();

    querier.tick(&controller.token()).await;

    let values_calls: Vec<String> = service
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Values { name } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(values_calls, vec!["instance".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn empty_discovery_skips_every_dependent_operation() {
    let now = ts("2026-08-04T12:00:00Z");
    let service = Arc::new(ScriptedService::default());
    let sink = Arc::new(RecordingSink::default());
    let mut querier = querier_with(&service, &sink, now, &ProbeConfig::default());
    let controller = ShutdownController::new();

    querier.tick(&controller.token()).await;

    for call in service.calls() {
        assert!(
            matches!(&call, Call::Labels | Call::ProfileTypes),
            "dependent operation issued without discovery: {call:?}"
        );
    }
    // Both discovery probes succeeded; nothing else was recorded.
    assert_eq!(sink.with_op(ProbeOp::Labels).len(), 1);
    assert_eq!(sink.with_op(ProbeOp::ProfileTypes).len(), 1);
    assert!(sink.with_op(ProbeOp::Values).is_empty());
    assert!(sink.with_op(ProbeOp::Range).is_empty());
    assert!(sink.with_op(ProbeOp::Single).is_empty());
    assert!(sink.with_op(ProbeOp::Merge).is_empty());
}

#[tokio::test(start_paused = true)]
async fn single_exercises_every_report_kind_at_the_first_timestamp() {
    let now = ts("2026-08-04T12:00:00Z");
    let first = "2026-08-04T11:00:00Z";
    let service = Arc::new(healthy_service(first, "2026-08-04T11:30:00Z"));
    let sink = Arc::new(RecordingSink::default());
    let mut querier = querier_with(&service, &sink, now, &ProbeConfig::default());
    let controller = ShutdownController::new();

    querier.tick(&controller.token()).await;

    let single_calls: Vec<(String, DateTime<Utc>, ReportKind)> = service
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Single {
                query,
                instant,
                report,
            } => Some((query, instant, report)),
            _ => None,
        })
        .collect();

    let expected_query = format!("{}{{job=\"api\"}}", cpu_profile_type().key());
    let mut seen_reports = Vec::new();
    assert_eq!(single_calls.len(), 3);
    for (query, instant, report) in single_calls {
        assert_eq!(query, expected_query);
        assert_eq!(instant, ts(first));
        seen_reports.push(report);
    }
    for kind in [
        ReportKind::Flamegraph,
        ReportKind::FlamegraphTable,
        ReportKind::Pprof,
    ] {
        assert!(seen_reports.contains(&kind), "missing report kind {kind}");
    }
}

#[tokio::test(start_paused = true)]
async fn failing_upstream_records_one_failure_per_request_per_tick() {
    let now = ts("2026-08-04T12:00:00Z");
    let service = Arc::new(healthy_service(
        "2026-08-04T10:00:00Z",
        "2026-08-04T11:00:00Z",
    ));
    let sink = Arc::new(RecordingSink::default());
    let probe = ProbeConfig {
        // One bucket and one report kind: one request per operation.
        time_ranges: vec![Duration::from_secs(15 * 60)],
        report_kinds: vec![ReportKind::Pprof],
        // Keep the tick-one discovery alive through the slow
        // (retry-heavy) second tick.
        discovery_ttl: Duration::from_secs(3600),
        series_ttl: Duration::from_secs(3600),
        ..Default::default()
    };
    let mut querier = querier_with(&service, &sink, now, &probe);
    let controller = ShutdownController::new();

    // Prime the caches with a healthy tick, then fail everything with
    // a retryable code.
    querier.tick(&controller.token()).await;
    let healthy_calls = service.calls().len();
    service.fail_with("unavailable");
    querier.tick(&controller.token()).await;

    for op in [
        ProbeOp::Labels,
        ProbeOp::Values,
        ProbeOp::ProfileTypes,
        ProbeOp::Range,
        ProbeOp::Single,
        ProbeOp::Merge,
    ] {
        let failed: Vec<_> = sink
            .with_op(op)
            .into_iter()
            .filter(|(code, ..)| code == "unavailable")
            .collect();
        assert_eq!(failed.len(), 1, "expected exactly one failure for {op}");
    }

    // The retry loop attempted each request more than once before the
    // budget ran out, yet only one observation per request landed.
    let failing_calls = service.calls().len() - healthy_calls;
    assert!(
        failing_calls > 6,
        "expected retries during the failing tick, saw {failing_calls} calls"
    );
}

#[tokio::test(start_paused = true)]
async fn run_returns_once_shutdown_fires() {
    let service = Arc::new(ScriptedService::default());
    let sink = Arc::new(RecordingSink::default());
    let querier = querier_with(
        &service,
        &sink,
        ts("2026-08-04T12:00:00Z"),
        &ProbeConfig::default(),
    );
    let controller = ShutdownController::new();

    let handle = tokio::spawn(querier.run(controller.token()));

    // Let a couple of ticks happen, then stop.
    tokio::time::sleep(Duration::from_secs(25)).await;
    controller.shutdown();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("querier should stop promptly after shutdown")
        .expect("querier task should not panic");

    assert!(sink.with_op(ProbeOp::Labels).len() >= 2);
}

#[tokio::test(start_paused = true)]
async fn noop_sink_pipeline_still_issues_requests() {
    let service = Arc::new(healthy_service(
        "2026-08-04T11:00:00Z",
        "2026-08-04T11:30:00Z",
    ));
    let client: Arc<dyn QueryService> = service.clone();
    let mut querier = Querier::new(
        client,
        Arc::new(NoopSink),
        Arc::new(FixedClock(ts("2026-08-04T12:00:00Z"))),
        &ProbeConfig::default(),
    );
    let controller = ShutdownController::new();

    querier.tick(&controller.token()).await;
    assert!(!service.calls().is_empty());
}
