//! Connect-JSON implementation of the query service client
//!
//! Each RPC is a POST of a JSON body to
//! `<base>/parca.query.v1alpha1.QueryService/<Method>`, following
//! protojson conventions: RFC 3339 timestamps, decimal-seconds
//! duration strings, SCREAMING_SNAKE enum names, int64 as strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::errors::ClientError;
use crate::service::QueryService;
use crate::types::{Label, LabelSet, ProfileType, RangeSeries, ReportKind, Sample, TimeWindow};

const SERVICE_PATH: &str = "parca.query.v1alpha1.QueryService";

/// Connect-protocol client for one query service instance.
pub struct ConnectClient {
    http: reqwest::Client,
    base: Url,
}

impl ConnectClient {
    /// Client for the service rooted at `base_url`, with every call
    /// bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base = Url::parse(base_url)?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, method: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(&format!("{SERVICE_PATH}/{method}"))?)
    }

    async fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(method)?;
        debug!(%url, "issuing query service request");

        let response = self.http.post(url).json(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(decode_connect_error(status, &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Connect error bodies are `{"code": "...", "message": "..."}`; fall
/// back to mapping the HTTP status when the body isn't one.
fn decode_connect_error(status: StatusCode, body: &[u8]) -> ClientError {
    #[derive(Deserialize)]
    struct WireError {
        #[serde(default)]
        code: String,
        #[serde(default)]
        message: String,
    }

    match serde_json::from_slice::<WireError>(body) {
        Ok(err) if !err.code.is_empty() => ClientError::Status {
            code: err.code,
            message: err.message,
        },
        _ => ClientError::Status {
            code: code_from_http(status).to_string(),
            message: format!("http status {status}"),
        },
    }
}

fn code_from_http(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "invalid_argument",
        401 => "unauthenticated",
        403 => "permission_denied",
        404 => "unimplemented",
        408 => "deadline_exceeded",
        429 => "resource_exhausted",
        502 | 503 | 504 => "unavailable",
        _ => "unknown",
    }
}

/// Protojson duration: decimal seconds with an `s` suffix.
fn encode_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let nanos = duration.subsec_nanos();
    if nanos == 0 {
        format!("{secs}s")
    } else {
        format!("{secs}.{nanos:09}s")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelsRequest {
    #[serde(rename = "match", skip_serializing_if = "Vec::is_empty")]
    matchers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValuesRequest {
    label_name: String,
    #[serde(rename = "match", skip_serializing_if = "Vec::is_empty")]
    matchers: Vec<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileTypesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRangeRequest {
    query: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SingleProfile {
    query: String,
    time: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MergeProfile {
    query: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    single: Option<SingleProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    merge: Option<MergeProfile>,
    report_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_trim_threshold: Option<f32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelsResponse {
    #[serde(default)]
    label_names: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValuesResponse {
    #[serde(default)]
    label_values: Vec<String>,
}

#[derive(Deserialize)]
struct ProfileTypesResponse {
    #[serde(default)]
    types: Vec<ProfileType>,
}

#[derive(Deserialize)]
struct QueryRangeResponse {
    #[serde(default)]
    series: Vec<WireSeries>,
}

#[derive(Deserialize)]
struct WireSeries {
    #[serde(default)]
    labelset: WireLabelSet,
    #[serde(default)]
    samples: Vec<Sample>,
}

#[derive(Default, Deserialize)]
struct WireLabelSet {
    #[serde(default)]
    labels: Vec<Label>,
}

#[async_trait]
impl QueryService for ConnectClient {
    async fn labels(&self, window: Option<TimeWindow>) -> Result<Vec<String>, ClientError> {
        let response: LabelsResponse = self
            .call(
                "Labels",
                &LabelsRequest {
                    matchers: Vec::new(),
                    start: window.map(|w| w.start),
                    end: window.map(|w| w.end),
                },
            )
            .await?;
        Ok(response.label_names)
    }

    async fn label_values(
        &self,
        name: &str,
        window: TimeWindow,
    ) -> Result<Vec<String>, ClientError> {
        let response: ValuesResponse = self
            .call(
                "Values",
                &ValuesRequest {
                    label_name: name.to_string(),
                    matchers: Vec::new(),
                    start: window.start,
                    end: window.end,
                },
            )
            .await?;
        Ok(response.label_values)
    }

    async fn profile_types(
        &self,
        window: Option<TimeWindow>,
    ) -> Result<Vec<ProfileType>, ClientError> {
        let response: ProfileTypesResponse = self
            .call(
                "ProfileTypes",
                &ProfileTypesRequest {
                    start: window.map(|w| w.start),
                    end: window.map(|w| w.end),
                },
            )
            .await?;
        Ok(response.types)
    }

    async fn query_range(
        &self,
        query: &str,
        window: TimeWindow,
        step: Duration,
    ) -> Result<Vec<RangeSeries>, ClientError> {
        let response: QueryRangeResponse = self
            .call(
                "QueryRange",
                &QueryRangeRequest {
                    query: query.to_string(),
                    start: window.start,
                    end: window.end,
                    step: encode_duration(step),
                },
            )
            .await?;

        Ok(response
            .series
            .into_iter()
            .map(|series| RangeSeries {
                labels: LabelSet::new(series.labelset.labels),
                samples: series.samples,
            })
            .collect())
    }

    async fn query_single(
        &self,
        query: &str,
        instant: DateTime<Utc>,
        report: ReportKind,
    ) -> Result<(), ClientError> {
        // The report body is validated as JSON and dropped.
        let _report: serde_json::Value = self
            .call(
                "Query",
                &QueryRequest {
                    mode: "MODE_SINGLE_UNSPECIFIED",
                    single: Some(SingleProfile {
                        query: query.to_string(),
                        time: instant,
                    }),
                    merge: None,
                    report_type: report.wire_name(),
                    node_trim_threshold: None,
                },
            )
            .await?;
        Ok(())
    }

    async fn query_merge(
        &self,
        query: &str,
        window: TimeWindow,
        report: ReportKind,
        trim_threshold: f32,
    ) -> Result<(), ClientError> {
        let _report: serde_json::Value = self
            .call(
                "Query",
                &QueryRequest {
                    mode: "MODE_MERGE",
                    single: None,
                    merge: Some(MergeProfile {
                        query: query.to_string(),
                        start: window.start,
                        end: window.end,
                    }),
                    report_type: report.wire_name(),
                    node_trim_threshold: Some(trim_threshold),
                },
            )
            .await?;
        Ok(())
    }
}
