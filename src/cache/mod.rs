//! Result cache in front of the storage engine.
//!
//! Keys are derived from the query parameters under the `timeseries:query:`
//! namespace, so every entry for one metric shares a prefix and can be
//! dropped together when new samples arrive. The cache is an optimisation
//! only: every backend failure or timeout is logged, counted and then treated
//! as a miss (reads) or a no-op (writes).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::interval::Interval;
use crate::metrics;
use crate::models::{QueryPoint, QuerySpec};
use crate::TimeseriesError;

pub mod memory;

pub use self::memory::MemoryCacheBackend;

/// Every key the service writes starts with this.
pub const KEY_NAMESPACE: &str = "timeseries:";
const QUERY_PREFIX: &str = "timeseries:query:";

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cached payload could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub entries: usize,
    pub used_memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Key/value store holding serialised query results.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    async fn ping(&self) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove one key, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key starting with `prefix`, returning how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    async fn stats(&self) -> Result<BackendStats, CacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Connected,
    Disconnected,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    pub status: CacheStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace_hits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace_misses: Option<u64>,
}

impl CacheInfo {
    fn without_stats(status: CacheStatus) -> Self {
        Self {
            status,
            entries: None,
            used_memory: None,
            keyspace_hits: None,
            keyspace_misses: None,
        }
    }
}

#[derive(Clone)]
pub struct ResultCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
    timeout: Duration,
    // Bumped before every invalidation so a result read before it is never stored after it.
    epoch: Arc<AtomicU64>,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deterministic key for a query. The aggregation suffix is only added
    /// when both aggregation and interval are present; a recognised interval
    /// is written in its canonical form so `1 hour` and `1h` share an entry.
    pub fn key_for(spec: &QuerySpec) -> String {
        let mut key = format!(
            "{}{}:{}",
            Self::metric_prefix(&spec.metric),
            spec.start.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            spec.end.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
        if let Some((aggregation, interval)) = spec.aggregation_pair() {
            let interval = Interval::parse(interval).map_or(interval, |parsed| parsed.as_str());
            key.push_str(&format!(":{}:{}", aggregation, interval));
        }
        key
    }

    pub fn metric_prefix(metric: &str) -> String {
        format!("{}{}:", QUERY_PREFIX, metric)
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    fn absorb(op: &'static str, err: &CacheError) {
        metrics::CACHE_ERRORS.with_label_values(&[op]).inc();
        warn!(op, error = %err, "cache operation failed, continuing without cache");
    }

    pub async fn get(&self, spec: &QuerySpec) -> Option<Vec<QueryPoint>> {
        let backend = self.backend.as_ref()?;
        let key = Self::key_for(spec);

        let decoded = self
            .call(async {
                let payload = backend.get(&key).await?;
                let points = payload
                    .map(|payload| serde_json::from_str::<Vec<QueryPoint>>(&payload))
                    .transpose()?;
                Ok::<_, CacheError>(points)
            })
            .await;

        match decoded {
            Ok(Some(points)) => {
                metrics::CACHE_HITS.inc();
                debug!(key = %key, "cache hit");
                Some(points)
            }
            Ok(None) => {
                metrics::CACHE_MISSES.inc();
                debug!(key = %key, "cache miss");
                None
            }
            Err(err) => {
                metrics::CACHE_MISSES.inc();
                Self::absorb("get", &err);
                None
            }
        }
    }

    /// Current invalidation epoch; pass it back to [`ResultCache::put_if_current`].
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub async fn put(&self, spec: &QuerySpec, payload: &[QueryPoint], ttl: Duration) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let key = Self::key_for(spec);

        let result = self
            .call(async {
                let encoded = serde_json::to_string(payload)?;
                backend.set(&key, encoded, ttl).await?;
                Ok::<_, CacheError>(())
            })
            .await;

        match result {
            Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "cached query result"),
            Err(err) => Self::absorb("set", &err),
        }
    }

    /// Store with the default TTL unless an invalidation happened since `epoch`
    /// was taken.
    ///
    /// The epoch is checked again once the write has landed: an invalidation
    /// that ran while the write was in flight may have deleted nothing, so the
    /// entry is removed here instead.
    pub async fn put_if_current(&self, spec: &QuerySpec, payload: &[QueryPoint], epoch: u64) {
        if self.epoch() != epoch {
            debug!(metric = %spec.metric, "skipping cache fill, invalidated while reading");
            return;
        }
        self.put(spec, payload, self.ttl).await;
        if self.epoch() != epoch {
            self.discard(spec).await;
        }
    }

    async fn discard(&self, spec: &QuerySpec) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let key = Self::key_for(spec);

        match self.call(backend.delete(&key)).await {
            Ok(removed) => debug!(key = %key, removed, "dropped cache fill that raced an invalidation"),
            Err(err) => Self::absorb("delete", &err),
        }
    }

    /// Drop every cached result for `metric`, raw and aggregated alike.
    pub async fn invalidate(&self, metric: &str) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };
        let prefix = Self::metric_prefix(metric);

        match self.call(backend.delete_prefix(&prefix)).await {
            Ok(removed) => {
                metrics::CACHE_INVALIDATED_KEYS.inc_by(removed as u64);
                debug!(metric, removed, "invalidated metric cache");
                removed
            }
            Err(err) => {
                Self::absorb("invalidate", &err);
                0
            }
        }
    }

    pub async fn invalidate_many<'a, I>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        join_all(names.into_iter().map(|metric| self.invalidate(metric)))
            .await
            .into_iter()
            .sum()
    }

    pub async fn clear_all(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };

        match self.call(backend.delete_prefix(KEY_NAMESPACE)).await {
            Ok(removed) => {
                metrics::CACHE_INVALIDATED_KEYS.inc_by(removed as u64);
                info!(removed, "cleared all cache");
                removed
            }
            Err(err) => {
                Self::absorb("clear", &err);
                0
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn is_connected(&self) -> bool {
        match self.backend.as_ref() {
            Some(backend) => self.call(backend.ping()).await.is_ok(),
            None => false,
        }
    }

    pub async fn info(&self) -> CacheInfo {
        let Some(backend) = self.backend.as_ref() else {
            return CacheInfo::without_stats(CacheStatus::Disabled);
        };

        match self.call(backend.stats()).await {
            Ok(stats) => CacheInfo {
                status: CacheStatus::Connected,
                entries: Some(stats.entries),
                used_memory: Some(human_bytes(stats.used_memory_bytes)),
                keyspace_hits: Some(stats.hits),
                keyspace_misses: Some(stats.misses),
            },
            Err(err) => {
                Self::absorb("info", &err);
                CacheInfo::without_stats(CacheStatus::Disconnected)
            }
        }
    }

    /// Keys in the service namespace. Unlike the rest of the cache API this
    /// reports an unavailable backend to the caller.
    pub async fn keys(&self) -> crate::Result<Vec<String>> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| TimeseriesError::CacheUnavailable("cache is disabled".to_string()))?;

        self.call(backend.keys(KEY_NAMESPACE))
            .await
            .map_err(|err| TimeseriesError::CacheUnavailable(err.to_string()))
    }
}

fn human_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "K", "M", "G"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.2}{}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Aggregation, ResultValue};
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn ts(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    fn raw_spec(metric: &str) -> QuerySpec {
        QuerySpec::raw(metric, ts("2024-01-15T09:00:00Z"), ts("2024-01-15T11:00:00Z"))
    }

    fn payload() -> Vec<QueryPoint> {
        vec![
            QueryPoint {
                time: ts("2024-01-15T10:00:00Z"),
                value: Some(ResultValue::Number(23.5)),
            },
            QueryPoint {
                time: ts("2024-01-15T10:05:00Z"),
                value: Some(ResultValue::Number(24.1)),
            },
        ]
    }

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn ping(&self) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _payload: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn keys(&self, _prefix: &str) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn stats(&self) -> Result<BackendStats, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    struct StalledBackend;

    #[async_trait]
    impl CacheBackend for StalledBackend {
        async fn ping(&self) -> Result<(), CacheError> {
            std::future::pending().await
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _payload: String, _ttl: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            std::future::pending().await
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
            std::future::pending().await
        }
        async fn keys(&self, _prefix: &str) -> Result<Vec<String>, CacheError> {
            std::future::pending().await
        }
        async fn stats(&self) -> Result<BackendStats, CacheError> {
            std::future::pending().await
        }
    }

    /// Parks every `set` until released, so an invalidation can run while a
    /// write is in flight.
    #[derive(Default)]
    struct GatedBackend {
        inner: MemoryCacheBackend,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl CacheBackend for GatedBackend {
        async fn ping(&self) -> Result<(), CacheError> {
            self.inner.ping().await
        }
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.set(key, payload, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.delete(key).await
        }
        async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
            self.inner.delete_prefix(prefix).await
        }
        async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
            self.inner.keys(prefix).await
        }
        async fn stats(&self) -> Result<BackendStats, CacheError> {
            self.inner.stats().await
        }
    }

    #[test]
    fn test_key_derivation() {
        assert_eq!(
            ResultCache::key_for(&raw_spec("temperature")),
            "timeseries:query:temperature:2024-01-15T09:00:00Z:2024-01-15T11:00:00Z"
        );
        assert_eq!(
            ResultCache::key_for(&raw_spec("temperature")),
            ResultCache::key_for(&raw_spec("temperature"))
        );

        let aggregated = QuerySpec::aggregated(
            "temperature",
            ts("2024-01-15T09:00:00Z"),
            ts("2024-01-15T11:00:00Z"),
            Aggregation::Avg,
            "1h",
        );
        assert_eq!(
            ResultCache::key_for(&aggregated),
            "timeseries:query:temperature:2024-01-15T09:00:00Z:2024-01-15T11:00:00Z:avg:1h"
        );

        for literal in ["1 hour", " 1H ", "1h"] {
            let spelled = QuerySpec::aggregated(
                "temperature",
                ts("2024-01-15T09:00:00Z"),
                ts("2024-01-15T11:00:00Z"),
                Aggregation::Avg,
                literal,
            );
            assert_eq!(ResultCache::key_for(&spelled), ResultCache::key_for(&aggregated));
        }

        let mut lone = raw_spec("temperature");
        lone.aggregation = Some(Aggregation::Max);
        assert_eq!(ResultCache::key_for(&lone), ResultCache::key_for(&raw_spec("temperature")));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = ResultCache::new(Arc::new(MemoryCacheBackend::default()));
        let spec = raw_spec("temperature");
        assert_eq!(cache.get(&spec).await, None);

        cache.put(&spec, &payload(), DEFAULT_TTL).await;
        assert_eq!(cache.get(&spec).await, Some(payload()));
    }

    #[tokio::test]
    async fn test_invalidate_drops_raw_and_aggregated_entries() {
        let cache = ResultCache::new(Arc::new(MemoryCacheBackend::default()));
        let raw = raw_spec("temperature");
        let aggregated = QuerySpec::aggregated(raw.metric.clone(), raw.start, raw.end, Aggregation::Avg, "1h");
        let other = raw_spec("humidity");
        for spec in [&raw, &aggregated, &other] {
            cache.put(spec, &payload(), DEFAULT_TTL).await;
        }

        assert_eq!(cache.invalidate("temperature").await, 2);
        assert_eq!(cache.get(&raw).await, None);
        assert_eq!(cache.get(&aggregated).await, None);
        assert_eq!(cache.get(&other).await, Some(payload()));

        assert_eq!(cache.clear_all().await, 1);
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fill_after_invalidation_is_dropped() {
        let cache = ResultCache::new(Arc::new(MemoryCacheBackend::default()));
        let spec = raw_spec("temperature");

        let epoch = cache.epoch();
        cache.invalidate("temperature").await;
        cache.put_if_current(&spec, &payload(), epoch).await;
        assert_eq!(cache.get(&spec).await, None);

        cache.put_if_current(&spec, &payload(), cache.epoch()).await;
        assert_eq!(cache.get(&spec).await, Some(payload()));
    }

    #[tokio::test]
    async fn test_fill_racing_an_invalidation_is_removed() {
        let backend = Arc::new(GatedBackend::default());
        let cache = ResultCache::new(backend.clone());
        let spec = raw_spec("temperature");

        let epoch = cache.epoch();
        let fill = tokio::spawn({
            let cache = cache.clone();
            let spec = spec.clone();
            async move { cache.put_if_current(&spec, &payload(), epoch).await }
        });

        // The write is parked inside the backend, so there is nothing to delete yet.
        backend.entered.notified().await;
        assert_eq!(cache.invalidate("temperature").await, 0);
        backend.release.notify_one();
        fill.await.unwrap();

        assert_eq!(cache.get(&spec).await, None);
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_broken_backend_degrades_to_miss() {
        let cache = ResultCache::new(Arc::new(BrokenBackend));
        let spec = raw_spec("temperature");

        cache.put(&spec, &payload(), DEFAULT_TTL).await;
        assert_eq!(cache.get(&spec).await, None);
        assert_eq!(cache.invalidate("temperature").await, 0);
        assert!(!cache.is_connected().await);
        assert_eq!(cache.info().await.status, CacheStatus::Disconnected);
        assert!(matches!(cache.keys().await, Err(TimeseriesError::CacheUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_backend_times_out() {
        let cache = ResultCache::new(Arc::new(StalledBackend)).with_timeout(Duration::from_millis(500));
        let spec = raw_spec("temperature");

        assert_eq!(cache.get(&spec).await, None);
        cache.put(&spec, &payload(), DEFAULT_TTL).await;
        assert!(!cache.is_connected().await);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = ResultCache::disabled();
        let spec = raw_spec("temperature");
        cache.put(&spec, &payload(), DEFAULT_TTL).await;
        assert_eq!(cache.get(&spec).await, None);
        assert_eq!(cache.info().await.status, CacheStatus::Disabled);
        assert!(!cache.is_enabled());
        assert!(cache.keys().await.is_err());
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512B");
        assert_eq!(human_bytes(2048), "2.00K");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.00M");
    }
}
