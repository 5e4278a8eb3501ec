use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::ResultCache;
use crate::metrics;
use crate::models::{QueryPoint, QuerySpec};
use crate::planner::QueryPlanner;
use crate::store::Storage;
use crate::{Result, TimeseriesError};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Read path: result cache first, then planner and storage.
#[derive(Clone)]
pub struct QueryService {
    planner: QueryPlanner,
    cache: ResultCache,
    timeout: Duration,
}

impl QueryService {
    pub fn new(storage: Arc<dyn Storage>, cache: ResultCache) -> Self {
        Self {
            planner: QueryPlanner::new(storage),
            cache,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn query(&self, spec: &QuerySpec) -> Result<Vec<QueryPoint>> {
        if let Some(points) = self.cache.get(spec).await {
            return Ok(points);
        }

        // Taken before reading so a concurrent ingest can veto the cache fill.
        let epoch = self.cache.epoch();
        let read = async {
            let plan = self.planner.plan(spec).await?;
            metrics::record_query(plan.shape());
            self.planner.execute(&plan).await
        };
        let points = tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| {
                TimeseriesError::Storage(format!(
                    "query for '{}' timed out after {:?}",
                    spec.metric, self.timeout
                ))
            })??;

        self.cache.put_if_current(spec, &points, epoch).await;
        debug!(metric = %spec.metric, rows = points.len(), "query served from storage");
        Ok(points)
    }
}
