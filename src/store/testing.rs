//! Storage wrappers used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DuckDbStorage, Storage, StorageTxn, TxnWork};
use crate::interval::Interval;
use crate::models::{Aggregation, Bucket, Metric, MetricId, MetricRef, Sample, SampleValue, ValueKind};
use crate::{Result, TimeseriesError};

/// Counts series reads so tests can tell whether a query reached storage.
pub struct CountingStorage {
    inner: DuckDbStorage,
    series_reads: AtomicUsize,
}

impl CountingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: DuckDbStorage::open_in_memory().unwrap(),
            series_reads: AtomicUsize::new(0),
        })
    }

    pub fn series_reads(&self) -> usize {
        self.series_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for CountingStorage {
    async fn lookup_metric(&self, name: &str) -> Result<Option<MetricRef>> {
        self.inner.lookup_metric(name).await
    }

    async fn list_metrics(&self) -> Result<Vec<Metric>> {
        self.inner.list_metrics().await
    }

    async fn range(&self, metric_id: MetricId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Sample>> {
        self.series_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.range(metric_id, start, end).await
    }

    async fn bucketed_aggregate(
        &self,
        metric_id: MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        aggregation: Aggregation,
    ) -> Result<Vec<Bucket>> {
        self.series_reads.fetch_add(1, Ordering::SeqCst);
        self.inner
            .bucketed_aggregate(metric_id, start, end, interval, aggregation)
            .await
    }

    async fn transaction(&self, work: TxnWork) -> Result<usize> {
        self.inner.transaction(work).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// Fails the append after `appends_before_failure` successful appends within
/// one transaction.
pub struct FailingStorage {
    inner: DuckDbStorage,
    appends_before_failure: usize,
}

impl FailingStorage {
    pub fn new(inner: DuckDbStorage, appends_before_failure: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            appends_before_failure,
        })
    }
}

struct FailingTxn<'a> {
    inner: &'a mut dyn StorageTxn,
    remaining: usize,
}

impl StorageTxn for FailingTxn<'_> {
    fn metric_kind(&mut self, name: &str) -> Result<Option<ValueKind>> {
        self.inner.metric_kind(name)
    }

    fn upsert_metric(&mut self, name: &str, kind: ValueKind, seen: DateTime<Utc>) -> Result<MetricId> {
        self.inner.upsert_metric(name, kind, seen)
    }

    fn append(&mut self, metric_id: MetricId, time: DateTime<Utc>, value: &SampleValue) -> Result<()> {
        if self.remaining == 0 {
            return Err(TimeseriesError::Storage("could not write sample: disk full".to_string()));
        }
        self.remaining -= 1;
        self.inner.append(metric_id, time, value)
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn lookup_metric(&self, name: &str) -> Result<Option<MetricRef>> {
        self.inner.lookup_metric(name).await
    }

    async fn list_metrics(&self) -> Result<Vec<Metric>> {
        self.inner.list_metrics().await
    }

    async fn range(&self, metric_id: MetricId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Sample>> {
        self.inner.range(metric_id, start, end).await
    }

    async fn bucketed_aggregate(
        &self,
        metric_id: MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        aggregation: Aggregation,
    ) -> Result<Vec<Bucket>> {
        self.inner
            .bucketed_aggregate(metric_id, start, end, interval, aggregation)
            .await
    }

    async fn transaction(&self, work: TxnWork) -> Result<usize> {
        let remaining = self.appends_before_failure;
        self.inner
            .transaction(Box::new(move |txn: &mut dyn StorageTxn| {
                let mut failing = FailingTxn { inner: txn, remaining };
                work(&mut failing)
            }))
            .await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// Knows one numeric metric, `temperature`, but never finishes a series read.
/// Nothing here touches the blocking pool, so paused-time tests can advance
/// straight to a timeout.
pub struct StalledStorage;

impl StalledStorage {
    pub const METRIC: MetricRef = MetricRef {
        id: MetricId(1),
        value_kind: ValueKind::Number,
    };
}

#[async_trait]
impl Storage for StalledStorage {
    async fn lookup_metric(&self, name: &str) -> Result<Option<MetricRef>> {
        Ok((name == "temperature").then_some(Self::METRIC))
    }

    async fn list_metrics(&self) -> Result<Vec<Metric>> {
        Ok(Vec::new())
    }

    async fn range(&self, _metric_id: MetricId, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<Vec<Sample>> {
        std::future::pending().await
    }

    async fn bucketed_aggregate(
        &self,
        _metric_id: MetricId,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _interval: Interval,
        _aggregation: Aggregation,
    ) -> Result<Vec<Bucket>> {
        std::future::pending().await
    }

    async fn transaction(&self, _work: TxnWork) -> Result<usize> {
        Err(TimeseriesError::Storage("read-only test storage".to_string()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
