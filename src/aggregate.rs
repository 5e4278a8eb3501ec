use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::Interval;
use crate::models::{Aggregation, Bucket, ResultValue, Sample, SampleValue};
use crate::Result;

/// Running totals for one bucket.
///
/// Text samples only contribute to `count`; the numeric aggregates behave like
/// their SQL counterparts and skip them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketAccumulator {
    pub count: u64,
    pub numeric_count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl BucketAccumulator {
    pub fn push(&mut self, value: &SampleValue) {
        self.count += 1;
        if let SampleValue::Number(value) = value {
            let value = *value;
            self.numeric_count += 1;
            self.sum += value;
            self.min = Some(self.min.map_or(value, |min| min.min(value)));
            self.max = Some(self.max.map_or(value, |max| max.max(value)));
        }
    }

    pub fn finish(&self, aggregation: Aggregation) -> Option<ResultValue> {
        let value = match aggregation {
            Aggregation::Count => return Some(ResultValue::Integer(self.count as i64)),
            _ if self.numeric_count == 0 => return None,
            Aggregation::Avg => self.sum / self.numeric_count as f64,
            Aggregation::Sum => self.sum,
            Aggregation::Min => self.min?,
            Aggregation::Max => self.max?,
        };
        Some(ResultValue::Number(value))
    }
}

/// Incremental bucketing: samples are folded in as they arrive, so memory
/// grows with the number of buckets rather than the number of samples.
#[derive(Debug, Clone)]
pub struct BucketFold {
    interval: Interval,
    aggregation: Aggregation,
    buckets: BTreeMap<DateTime<Utc>, BucketAccumulator>,
}

impl BucketFold {
    pub fn new(interval: Interval, aggregation: Aggregation) -> Self {
        Self {
            interval,
            aggregation,
            buckets: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, time: DateTime<Utc>, value: &SampleValue) -> Result<()> {
        let start = self.interval.bucket_start(time)?;
        self.buckets.entry(start).or_default().push(value);
        Ok(())
    }

    /// Non-empty buckets ordered by start.
    pub fn finish(self) -> Vec<Bucket> {
        let aggregation = self.aggregation;
        self.buckets
            .into_iter()
            .map(|(start, acc)| Bucket {
                start,
                value: acc.finish(aggregation),
            })
            .collect()
    }
}

/// Group samples into `interval` buckets and reduce each with `aggregation`.
///
/// Only buckets that received at least one sample are returned, ordered by
/// bucket start.
pub fn bucketize<I>(samples: I, interval: Interval, aggregation: Aggregation) -> Result<Vec<Bucket>>
where
    I: IntoIterator<Item = Sample>,
{
    let mut fold = BucketFold::new(interval, aggregation);
    for sample in samples {
        fold.push(sample.time, &sample.value)?;
    }
    Ok(fold.finish())
}
