use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{Metric, MetricId, MetricRef, ValueKind};
use crate::store::{Storage, StorageTxn};
use crate::{Result, TimeseriesError};

/// What to do when a known metric is observed with a different value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindConflictPolicy {
    /// The latest observation wins and the stored kind is replaced.
    #[default]
    Overwrite,
    /// The batch is refused and nothing in it is written.
    Reject,
}

impl FromStr for KindConflictPolicy {
    type Err = TimeseriesError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(KindConflictPolicy::Overwrite),
            "reject" => Ok(KindConflictPolicy::Reject),
            other => Err(TimeseriesError::Config(format!(
                "unknown kind conflict policy '{}' (expected overwrite or reject)",
                other
            ))),
        }
    }
}

impl fmt::Display for KindConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KindConflictPolicy::Overwrite => f.write_str("overwrite"),
            KindConflictPolicy::Reject => f.write_str("reject"),
        }
    }
}

/// Read side of the metric catalog.
///
/// Lookups always go to storage: a metric's kind may change between
/// requests, so nothing is remembered across calls.
#[derive(Clone)]
pub struct Catalog {
    storage: Arc<dyn Storage>,
}

impl Catalog {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn lookup(&self, name: &str) -> Result<MetricRef> {
        self.storage
            .lookup_metric(name)
            .await?
            .ok_or_else(|| TimeseriesError::MetricNotFound(name.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Metric>> {
        self.storage.list_metrics().await
    }
}

/// Record an observation of `name` inside an open write transaction.
pub fn upsert(
    txn: &mut dyn StorageTxn,
    policy: KindConflictPolicy,
    name: &str,
    observed_kind: ValueKind,
    observed_time: DateTime<Utc>,
) -> Result<MetricId> {
    if policy == KindConflictPolicy::Reject {
        if let Some(stored) = txn.metric_kind(name)? {
            if stored != observed_kind {
                return Err(TimeseriesError::Validation(format!(
                    "metric '{}' stores {} values but received a {} value",
                    name, stored, observed_kind
                )));
            }
        }
    }

    let id = txn.upsert_metric(name, observed_kind, observed_time)?;
    debug!(metric = name, id = id.0, kind = %observed_kind, "catalog upsert");
    Ok(id)
}
