//! Snapshot cache: durable storage fronted by a bounded in-memory hot layer.
//!
//! The durable layer keeps every snapshot. The hot layer only holds copies and may drop
//! them at any time, either through LRU pressure or when an expired entry is read.

use std::sync::{Arc, Mutex};

use lru::LruCache;
use metrics::counter;
use tracing::{debug, instrument};

use crate::application::storage::{SnapshotStorage, StorageError, read_json, write_json};
use crate::domain::clock::{Clock, duration_ms};
use crate::domain::entities::{CacheEntry, CacheLookup};

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "prerender_cache_hit_total";
const METRIC_CACHE_MISS: &str = "prerender_cache_miss_total";
const METRIC_CACHE_STALE: &str = "prerender_cache_stale_total";

pub struct SnapshotCache {
    ttl_ms: i64,
    storage: Arc<dyn SnapshotStorage>,
    clock: Arc<dyn Clock>,
    hot: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl SnapshotCache {
    pub fn new(
        config: &CacheConfig,
        storage: Arc<dyn SnapshotStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ttl_ms: duration_ms(config.ttl),
            storage,
            clock,
            hot: Mutex::new(LruCache::new(config.hot_limit_non_zero())),
        }
    }

    /// Look up the snapshot for `key`.
    ///
    /// Missing entries come back as empty HTML flagged for revalidation. Expired entries
    /// keep their HTML, are flagged, and lose their hot copy.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &CacheKey) -> Result<CacheLookup, StorageError> {
        let hot = mutex_lock(&self.hot, SOURCE, "get").get(key).cloned();
        let (entry, from_hot) = match hot {
            Some(entry) => (entry, true),
            None => {
                let stored =
                    read_json::<CacheEntry>(self.storage.as_ref(), &key.storage_key()).await?;
                match stored {
                    Some(entry) => (entry, false),
                    None => {
                        counter!(METRIC_CACHE_MISS).increment(1);
                        return Ok(CacheLookup::missing());
                    }
                }
            }
        };

        if self.is_expired(&entry) {
            mutex_lock(&self.hot, SOURCE, "get.evict_expired").pop(key);
            counter!(METRIC_CACHE_STALE).increment(1);
            debug!(last_updated = entry.last_updated, "snapshot expired");
            return Ok(CacheLookup {
                html: entry.html,
                must_revalidate: true,
            });
        }

        if !from_hot {
            mutex_lock(&self.hot, SOURCE, "get.populate").put(key.clone(), entry.clone());
        }
        counter!(METRIC_CACHE_HIT).increment(1);
        Ok(CacheLookup {
            html: entry.html,
            must_revalidate: false,
        })
    }

    /// Store `html` for `key` stamped with the current time.
    ///
    /// Returns once the durable write succeeded. The hot layer is only touched after that,
    /// so a failed write leaves no trace.
    #[instrument(skip(self, html), fields(key = %key, bytes = html.len()))]
    pub async fn set(&self, key: &CacheKey, html: String) -> Result<CacheEntry, StorageError> {
        let entry = CacheEntry {
            html,
            last_updated: self.clock.now_ms(),
        };
        write_json(self.storage.as_ref(), &key.storage_key(), &entry).await?;
        mutex_lock(&self.hot, SOURCE, "set").put(key.clone(), entry.clone());
        Ok(entry)
    }

    /// Drop the snapshot for `key` from both layers. The durable delete comes first, so
    /// a failed delete leaves the hot copy serving.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn remove(&self, key: &CacheKey) -> Result<(), StorageError> {
        self.storage.delete(&key.storage_key()).await?;
        mutex_lock(&self.hot, SOURCE, "remove").pop(key);
        debug!("snapshot removed");
        Ok(())
    }

    /// Whether a hot copy of `key` is currently held.
    pub fn is_hot(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.hot, SOURCE, "is_hot").contains(key)
    }

    pub fn hot_len(&self) -> usize {
        mutex_lock(&self.hot, SOURCE, "hot_len").len()
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.clock.now_ms().saturating_sub(entry.last_updated) > self.ttl_ms
    }
}
