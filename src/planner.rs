//! Turns a [`QuerySpec`] into a storage read.
//!
//! Rules, in order:
//! 1. the metric must exist in the catalog;
//! 2. when both aggregation and interval are given, the interval must be one
//!    of the allowed widths and the aggregation must suit the metric's kind
//!    (`count` works on anything, the numeric ones need a numeric metric);
//! 3. otherwise the query is a raw range read, and a lone aggregation or a
//!    lone interval is ignored.
//!
//! The time range itself is not checked here: an inverted range simply
//! returns no rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::catalog::Catalog;
use crate::interval::Interval;
use crate::models::{Aggregation, MetricId, QueryPoint, QuerySpec};
use crate::store::Storage;
use crate::{Result, TimeseriesError};

#[derive(Debug, Clone, PartialEq)]
pub enum PlannedQuery {
    Raw {
        metric_id: MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Bucketed {
        metric_id: MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        aggregation: Aggregation,
    },
}

impl PlannedQuery {
    pub fn shape(&self) -> &'static str {
        match self {
            PlannedQuery::Raw { .. } => "raw",
            PlannedQuery::Bucketed { .. } => "bucketed",
        }
    }
}

#[derive(Clone)]
pub struct QueryPlanner {
    catalog: Catalog,
    storage: Arc<dyn Storage>,
}

impl QueryPlanner {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            catalog: Catalog::new(Arc::clone(&storage)),
            storage,
        }
    }

    pub async fn plan(&self, spec: &QuerySpec) -> Result<PlannedQuery> {
        let metric = self.catalog.lookup(&spec.metric).await?;

        let Some((aggregation, raw_interval)) = spec.aggregation_pair() else {
            return Ok(PlannedQuery::Raw {
                metric_id: metric.id,
                start: spec.start,
                end: spec.end,
            });
        };

        let interval = Interval::parse(raw_interval)?;
        if !aggregation.supports(metric.value_kind) {
            return Err(TimeseriesError::UnsupportedAggregation {
                metric: spec.metric.clone(),
                aggregation: aggregation.to_string(),
            });
        }

        Ok(PlannedQuery::Bucketed {
            metric_id: metric.id,
            start: spec.start,
            end: spec.end,
            interval,
            aggregation,
        })
    }

    pub async fn execute(&self, plan: &PlannedQuery) -> Result<Vec<QueryPoint>> {
        let points: Vec<QueryPoint> = match *plan {
            PlannedQuery::Raw { metric_id, start, end } => self
                .storage
                .range(metric_id, start, end)
                .await?
                .into_iter()
                .map(QueryPoint::from)
                .collect(),
            PlannedQuery::Bucketed {
                metric_id,
                start,
                end,
                interval,
                aggregation,
            } => self
                .storage
                .bucketed_aggregate(metric_id, start, end, interval, aggregation)
                .await?
                .into_iter()
                .map(QueryPoint::from)
                .collect(),
        };

        debug!(shape = plan.shape(), rows = points.len(), "executed query plan");
        Ok(points)
    }
}
