//! Data model shared between the wire client and the querier

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// A closed query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of the given length ending at `end`.
    pub fn trailing(end: DateTime<Utc>, length: Duration) -> Self {
        let length =
            ChronoDuration::from_std(length).unwrap_or_else(|_| ChronoDuration::max_value());
        Self {
            start: end - length,
            end,
        }
    }

    /// Window length, zero if the window is inverted.
    pub fn span(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or_default()
    }
}

/// One category of profiling data as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileType {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sample_type: String,
    #[serde(default)]
    pub sample_unit: String,
    #[serde(default)]
    pub period_type: String,
    #[serde(default)]
    pub period_unit: String,
    #[serde(default)]
    pub delta: bool,
}

impl ProfileType {
    /// Canonical key, used both as a cache key and as the query
    /// string for range and merge requests. Equivalent profile types
    /// always produce the same key.
    pub fn key(&self) -> String {
        let mut key = format!(
            "{}:{}:{}:{}:{}",
            self.name, self.sample_type, self.sample_unit, self.period_type, self.period_unit
        );
        if self.delta {
            key.push_str(":delta");
        }
        key
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A single name/value pair attached to a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// A set of labels in canonical (name-sorted) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet(Vec<Label>);

impl LabelSet {
    /// Canonicalize: sort by name so equal sets render identically
    /// regardless of the order the service returned them in.
    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value)));
        Self(labels)
    }

    pub fn labels(&self) -> &[Label] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LabelSet {
    /// Renders `{a="x", b="y"}`, the selector syntax the query
    /// service accepts appended to a profile-type key.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

/// One metric sample of a discovered series.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "de_int64")]
    pub value: i64,
}

/// One series returned by a range query: its identifying labels plus
/// the samples observed inside the window.
#[derive(Debug, Clone)]
pub struct RangeSeries {
    pub labels: LabelSet,
    pub samples: Vec<Sample>,
}

/// Report encodings the query service can render.
///
/// The two flamegraph encodings answer the same underlying query;
/// probing exercises both so their latencies stay comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Flamegraph,
    FlamegraphTable,
    Pprof,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Flamegraph => "flamegraph",
            ReportKind::FlamegraphTable => "flamegraph_table",
            ReportKind::Pprof => "pprof",
        }
    }

    /// Protojson enum name sent on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ReportKind::Flamegraph => "REPORT_TYPE_FLAMEGRAPH_UNSPECIFIED",
            ReportKind::FlamegraphTable => "REPORT_TYPE_FLAMEGRAPH_TABLE",
            ReportKind::Pprof => "REPORT_TYPE_PPROF",
        }
    }

    pub fn is_flamegraph(&self) -> bool {
        matches!(self, ReportKind::Flamegraph | ReportKind::FlamegraphTable)
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protojson encodes 64-bit integers as strings; accept both.
fn de_int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct Int64Visitor;

    impl serde::de::Visitor<'_> for Int64Visitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer or a decimal string")
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(E::custom)
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<i64, E> {
            v.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(Int64Visitor)
}
