//! Contract between the service and the time-series storage engine.
//!
//! The engine owns two tables: the metric catalog (one row per name) and the
//! append-only samples. Reads go through [`Storage`]; writes happen inside a
//! single transaction handed a [`StorageTxn`], so that a batch either lands
//! completely or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::interval::Interval;
use crate::models::{Aggregation, Bucket, Metric, MetricId, MetricRef, Sample, SampleValue, ValueKind};
use crate::Result;

pub mod duckdb_store;
#[cfg(test)]
pub(crate) mod testing;

pub use self::duckdb_store::DuckDbStorage;

/// Work executed inside one write transaction. Returning an error rolls back
/// everything the closure did.
pub type TxnWork = Box<dyn FnOnce(&mut dyn StorageTxn) -> Result<usize> + Send>;

/// Operations available while a write transaction is open.
pub trait StorageTxn {
    /// Kind currently recorded for `name`, if the name exists.
    fn metric_kind(&mut self, name: &str) -> Result<Option<ValueKind>>;

    /// Insert-or-merge the catalog row for `name` in one statement.
    ///
    /// A new row gets `first_seen = last_seen = seen`. An existing row has
    /// `last_seen` advanced to `max(last_seen, seen)` and its kind replaced by
    /// `kind`.
    fn upsert_metric(&mut self, name: &str, kind: ValueKind, seen: DateTime<Utc>) -> Result<MetricId>;

    fn append(&mut self, metric_id: MetricId, time: DateTime<Utc>, value: &SampleValue) -> Result<()>;
}

#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn lookup_metric(&self, name: &str) -> Result<Option<MetricRef>>;

    /// All catalog rows ordered by name.
    async fn list_metrics(&self) -> Result<Vec<Metric>>;

    /// Samples with `start <= time <= end`, oldest first. An inverted range
    /// yields nothing.
    async fn range(&self, metric_id: MetricId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Sample>>;

    /// Samples of the inclusive range grouped into `interval` buckets, ordered
    /// by bucket start. Numeric aggregations must not be requested for text
    /// series; the planner guarantees it.
    async fn bucketed_aggregate(
        &self,
        metric_id: MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        aggregation: Aggregation,
    ) -> Result<Vec<Bucket>>;

    async fn transaction(&self, work: TxnWork) -> Result<usize>;

    async fn ping(&self) -> Result<()>;
}
