use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared value kind of a metric. Persisted as `number` / `string`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "string")]
    Text,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::Text => "string",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "number" => Some(ValueKind::Number),
            "string" => Some(ValueKind::Text),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed value. JSON numbers become `Number`, JSON strings `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Text(String),
}

impl SampleValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            SampleValue::Number(_) => ValueKind::Number,
            SampleValue::Text(_) => ValueKind::Text,
        }
    }
}

/// Value reported in a query result row.
///
/// Raw rows carry whichever slot the sample populated; bucket rows carry a
/// number, or an integer for `count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Integer(i64),
    Number(f64),
    Text(String),
}

impl From<SampleValue> for ResultValue {
    fn from(value: SampleValue) -> Self {
        match value {
            SampleValue::Number(n) => ResultValue::Number(n),
            SampleValue::Text(t) => ResultValue::Text(t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Avg,
    Sum,
    Min,
    Max,
    Count,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Avg => "avg",
            Aggregation::Sum => "sum",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Count => "count",
        }
    }

    /// Whether the aggregation can be computed over a series of the given kind.
    pub fn supports(&self, kind: ValueKind) -> bool {
        match (self, kind) {
            (_, ValueKind::Number) => true,
            (Aggregation::Count, ValueKind::Text) => true,
            (Aggregation::Avg | Aggregation::Sum | Aggregation::Min | Aggregation::Max, ValueKind::Text) => false,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricId(pub i64);

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog row for a metric name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: MetricId,
    pub name: String,
    pub value_kind: ValueKind,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The part of a catalog row the query path needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricRef {
    pub id: MetricId,
    pub value_kind: ValueKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub value: SampleValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub value: Option<ResultValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub time: DateTime<Utc>,
    pub metric: String,
    pub value: SampleValue,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestRequest {
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub ingested_count: usize,
}

/// Parameters of a read. `interval` stays as the caller's literal until the
/// planner resolves it against the allowed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub metric: String,
    #[serde(rename = "start_time")]
    pub start: DateTime<Utc>,
    #[serde(rename = "end_time")]
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
    #[serde(default)]
    pub interval: Option<String>,
}

impl QuerySpec {
    pub fn raw(metric: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            metric: metric.into(),
            start,
            end,
            aggregation: None,
            interval: None,
        }
    }

    pub fn aggregated(
        metric: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        aggregation: Aggregation,
        interval: impl Into<String>,
    ) -> Self {
        Self {
            metric: metric.into(),
            start,
            end,
            aggregation: Some(aggregation),
            interval: Some(interval.into()),
        }
    }

    /// Aggregation and interval only count as a pair.
    pub fn aggregation_pair(&self) -> Option<(Aggregation, &str)> {
        match (self.aggregation, self.interval.as_deref()) {
            (Some(aggregation), Some(interval)) => Some((aggregation, interval)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPoint {
    pub time: DateTime<Utc>,
    pub value: Option<ResultValue>,
}

impl From<Sample> for QueryPoint {
    fn from(sample: Sample) -> Self {
        Self {
            time: sample.time,
            value: Some(sample.value.into()),
        }
    }
}

impl From<Bucket> for QueryPoint {
    fn from(bucket: Bucket) -> Self {
        Self {
            time: bucket.start,
            value: bucket.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricInfo {
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub value_type: ValueKind,
}

impl From<Metric> for MetricInfo {
    fn from(metric: Metric) -> Self {
        Self {
            name: metric.name,
            first_seen: metric.first_seen,
            value_type: metric.value_kind,
        }
    }
}
