use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::catalog::{self, KindConflictPolicy};
use crate::metrics;
use crate::models::DataPoint;
use crate::store::{Storage, StorageTxn};
use crate::validators;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub ingested_count: usize,
}

/// Write path: validate, record every point in one transaction, then drop
/// cached results for the metrics the batch touched.
#[derive(Clone)]
pub struct IngestPipeline {
    storage: Arc<dyn Storage>,
    cache: ResultCache,
    policy: KindConflictPolicy,
}

impl IngestPipeline {
    pub fn new(storage: Arc<dyn Storage>, cache: ResultCache) -> Self {
        Self {
            storage,
            cache,
            policy: KindConflictPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: KindConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Points are applied in request order. Any failure rolls back the whole
    /// batch, so on success the count always equals the batch length.
    pub async fn ingest(&self, batch: Vec<DataPoint>) -> Result<IngestReport> {
        validators::validate_data_points(&batch, Utc::now())?;

        let touched: BTreeSet<String> = batch.iter().map(|point| point.metric.clone()).collect();
        let policy = self.policy;
        let written = self
            .storage
            .transaction(Box::new(move |txn: &mut dyn StorageTxn| {
                let mut inserted = 0;
                for point in &batch {
                    let metric_id = catalog::upsert(txn, policy, &point.metric, point.value.kind(), point.time)?;
                    txn.append(metric_id, point.time, &point.value)?;
                    inserted += 1;
                }
                Ok(inserted)
            }))
            .await;

        let inserted = match written {
            Ok(inserted) => inserted,
            Err(err) => {
                metrics::record_ingest_failure();
                warn!(error = %err, metrics = touched.len(), "ingest batch rolled back");
                return Err(err);
            }
        };

        let evicted = self
            .cache
            .invalidate_many(touched.iter().map(String::as_str))
            .await;
        metrics::record_points_ingested(inserted);
        info!(
            points = inserted,
            metrics = touched.len(),
            evicted,
            "ingested batch"
        );

        Ok(IngestReport {
            ingested_count: inserted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCacheBackend, DEFAULT_TTL};
    use crate::models::{QueryPoint, QuerySpec, ResultValue, SampleValue, ValueKind};
    use crate::store::testing::FailingStorage;
    use crate::store::DuckDbStorage;
    use crate::TimeseriesError;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn ts(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    fn point(time: &str, metric: &str, value: SampleValue) -> DataPoint {
        DataPoint {
            time: ts(time),
            metric: metric.to_string(),
            value,
        }
    }

    fn memory_cache() -> ResultCache {
        ResultCache::new(Arc::new(MemoryCacheBackend::default()))
    }

    #[tokio::test]
    async fn test_first_ingest_creates_metric() {
        let storage = Arc::new(DuckDbStorage::open_in_memory().unwrap());
        let pipeline = IngestPipeline::new(storage.clone(), memory_cache());

        let report = pipeline
            .ingest(vec![
                point("2024-01-15T10:00:00Z", "temperature", SampleValue::Number(23.5)),
                point("2024-01-15T10:05:00Z", "temperature", SampleValue::Number(24.1)),
                point("2024-01-15T10:00:00Z", "event", SampleValue::Text("machine_start".into())),
            ])
            .await
            .unwrap();
        assert_eq!(report, IngestReport { ingested_count: 3 });

        let metrics = storage.list_metrics().await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].name, "event");
        assert_eq!(metrics[0].value_kind, ValueKind::Text);
        assert_eq!(metrics[1].name, "temperature");
        assert_eq!(metrics[1].first_seen, ts("2024-01-15T10:00:00Z"));
        assert_eq!(metrics[1].last_seen, ts("2024-01-15T10:05:00Z"));
    }

    #[test_log::test(tokio::test)]
    async fn test_storage_failure_rolls_back_whole_batch() {
        let engine = DuckDbStorage::open_in_memory().unwrap();
        let pipeline = IngestPipeline::new(FailingStorage::new(engine.clone(), 2), memory_cache());

        let err = pipeline
            .ingest(vec![
                point("2024-01-15T10:00:00Z", "temperature", SampleValue::Number(23.5)),
                point("2024-01-15T10:05:00Z", "humidity", SampleValue::Number(40.0)),
                point("2024-01-15T10:10:00Z", "pressure", SampleValue::Number(1013.0)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, TimeseriesError::Storage(ref msg) if msg.contains("disk full")));

        assert!(engine.list_metrics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_evicts_cached_results_for_touched_metrics() {
        let storage = Arc::new(DuckDbStorage::open_in_memory().unwrap());
        let cache = memory_cache();
        let pipeline = IngestPipeline::new(storage, cache.clone());

        let touched = QuerySpec::raw("temperature", ts("2024-01-15T09:00:00Z"), ts("2024-01-15T11:00:00Z"));
        let untouched = QuerySpec::raw("humidity", ts("2024-01-15T09:00:00Z"), ts("2024-01-15T11:00:00Z"));
        let stale = vec![QueryPoint {
            time: ts("2024-01-15T10:00:00Z"),
            value: Some(ResultValue::Number(1.0)),
        }];
        cache.put(&touched, &stale, DEFAULT_TTL).await;
        cache.put(&untouched, &stale, DEFAULT_TTL).await;

        pipeline
            .ingest(vec![point("2024-01-15T10:30:00Z", "temperature", SampleValue::Number(24.0))])
            .await
            .unwrap();

        assert_eq!(cache.get(&touched).await, None);
        assert_eq!(cache.get(&untouched).await, Some(stale));
    }

    #[tokio::test]
    async fn test_reject_policy_fails_batch_on_kind_change() {
        let storage = Arc::new(DuckDbStorage::open_in_memory().unwrap());
        let pipeline = IngestPipeline::new(storage.clone(), memory_cache()).with_policy(KindConflictPolicy::Reject);

        let err = pipeline
            .ingest(vec![
                point("2024-01-15T10:00:00Z", "status", SampleValue::Number(1.0)),
                point("2024-01-15T10:01:00Z", "status", SampleValue::Text("up".into())),
            ])
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(storage.list_metrics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_kind_in_batch_wins_by_default() {
        let storage = Arc::new(DuckDbStorage::open_in_memory().unwrap());
        let pipeline = IngestPipeline::new(storage.clone(), memory_cache());

        pipeline
            .ingest(vec![
                point("2024-01-15T10:00:00Z", "status", SampleValue::Number(1.0)),
                point("2024-01-15T10:01:00Z", "status", SampleValue::Text("up".into())),
            ])
            .await
            .unwrap();
        let metric = storage.lookup_metric("status").await.unwrap().unwrap();
        assert_eq!(metric.value_kind, ValueKind::Text);
    }

    #[tokio::test]
    async fn test_validation_happens_before_storage() {
        let storage = Arc::new(DuckDbStorage::open_in_memory().unwrap());
        let pipeline = IngestPipeline::new(storage.clone(), memory_cache());

        let err = pipeline
            .ingest(vec![
                point("2024-01-15T10:00:00Z", "temperature", SampleValue::Number(1.0)),
                point("2999-01-01T00:00:00Z", "temperature", SampleValue::Number(2.0)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, TimeseriesError::Validation(_)));
        assert!(storage.list_metrics().await.unwrap().is_empty());
    }
}
