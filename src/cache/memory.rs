//! In-process cache backend.
//!
//! Entries expire after their TTL and are dropped lazily on access. When the
//! map is full, expired entries are purged first and then the entry closest
//! to expiry is evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use super::{BackendStats, CacheBackend, CacheError};

struct StoredEntry {
    payload: String,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, StoredEntry>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCacheBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn make_room(entries: &mut HashMap<String, StoredEntry>, max_entries: usize, now: Instant) {
        if entries.len() < max_entries {
            return;
        }
        entries.retain(|_, entry| !entry.is_expired(now));
        if entries.len() < max_entries {
            return;
        }
        let soonest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = soonest {
            entries.remove(&key);
        }
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let found = {
            let entries = self.entries.read();
            entries
                .get(key)
                .filter(|entry| !entry.is_expired(now))
                .map(|entry| entry.payload.clone())
        };

        match found {
            Some(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(payload))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let mut entries = self.entries.write();
                if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
                    entries.remove(key);
                }
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if !entries.contains_key(key) {
            Self::make_room(&mut entries, self.max_entries, now);
        }
        entries.insert(
            key.to_string(),
            StoredEntry {
                payload,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn stats(&self) -> Result<BackendStats, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read();
        let live = entries.values().filter(|entry| !entry.is_expired(now));
        let (count, bytes) = live.fold((0usize, 0usize), |(count, bytes), entry| {
            (count + 1, bytes + entry.payload.len())
        });
        let key_bytes: usize = entries.keys().map(String::len).sum();

        Ok(BackendStats {
            entries: count,
            used_memory_bytes: bytes + key_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        })
    }
}
