//! Warm-cache registry: duration buckets, recency records, and the
//! read-through accessor.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{CacheError, Refresher};
use crate::store::TtlStore;
use crate::time::{Clock, DAY_SECS};

/// Upper bound on the storage TTL: two days.
pub const MAX_STORAGE_TTL_SECS: i64 = 2 * DAY_SECS;

/// Offset past the day boundary used when aligning one-day TTLs, pushing
/// the refill into the quiet hours.
const DAY_ALIGN_OFFSET_SECS: i64 = 2 * 3600;

/// A concrete cache key plus the bucket (key template) it belongs to.
///
/// Keys produced from the same template share one bucket and therefore
/// one refresh duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub bucket: String,
    pub name: String,
}

impl CacheKey {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }
}

struct CacheEntry {
    last_access: i64,
    refresher: Arc<dyn Refresher>,
}

/// One duration bucket: recency records for every key accessed through it.
pub struct Bucket {
    duration: i64,
    keys: RwLock<HashMap<String, CacheEntry>>,
}

impl Bucket {
    fn new(duration: i64) -> Self {
        Self {
            duration,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Storage TTL: ten refresh windows, capped at two days.
    pub fn storage_ttl(&self) -> i64 {
        (self.duration * 10).min(MAX_STORAGE_TTL_SECS)
    }

    fn touch(&self, name: &str, refresher: Arc<dyn Refresher>, now: i64) {
        self.keys.write().insert(
            name.to_string(),
            CacheEntry {
                last_access: now,
                refresher,
            },
        );
    }

    /// Refreshes every recently-accessed key whose stored entry has
    /// consumed at least `duration` of its TTL. Returns how many keys
    /// were rewritten.
    async fn refresh_due(
        &self,
        store: &dyn TtlStore,
        clock: &Clock,
        prefix: &str,
    ) -> Result<usize, CacheError> {
        let now = clock.now_unix();
        let candidates: Vec<(String, Arc<dyn Refresher>)> = {
            let keys = self.keys.read();
            keys.iter()
                // Idle keys drop out of the warm set and expire naturally.
                .filter(|(_, entry)| now - entry.last_access <= self.duration)
                .map(|(name, entry)| (name.clone(), Arc::clone(&entry.refresher)))
                .collect()
        };

        let mut refreshed = 0;
        for (name, refresher) in candidates {
            let key = storage_key(prefix, &name);
            let remaining = store.ttl(&key).await?.unwrap_or(0);
            let consumed = self.storage_ttl() - remaining;
            if consumed < self.duration {
                // Rewritten recently enough; nothing to do yet.
                continue;
            }

            let value = refresher.refresh().await?;
            let raw = serde_json::to_string(&value)?;
            store.set_ex(&key, &raw, self.storage_ttl()).await?;
            refreshed += 1;
            debug!(key = %name, "Cache entry refreshed");
        }
        Ok(refreshed)
    }
}

fn storage_key(prefix: &str, name: &str) -> String {
    format!("{prefix}:cache:{name}")
}

/// Registry of duration buckets plus the read-through accessor.
///
/// Two-level locking: the registry write lock is taken only when a bucket
/// is first created; key writes within an existing bucket take that
/// bucket's lock alone, so buckets do not contend with each other.
pub struct WarmCache {
    store: Arc<dyn TtlStore>,
    clock: Arc<Clock>,
    prefix: String,
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
}

impl WarmCache {
    pub fn new(store: Arc<dyn TtlStore>, clock: Arc<Clock>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            prefix: prefix.into(),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn bucket(&self, name: &str, duration: i64) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.read().get(name) {
            return Arc::clone(bucket);
        }
        let mut buckets = self.buckets.write();
        Arc::clone(
            buckets
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Bucket::new(duration))),
        )
    }

    /// Read-through access.
    ///
    /// Bumps (or creates) the key's recency record, then serves the stored
    /// value if present. On a miss the refresher runs, and its value is
    /// stored with the bucket's TTL; producer errors propagate without
    /// caching. With `force` the stored value is deleted and a fresh value
    /// returned without re-caching.
    pub async fn get_through(
        &self,
        key: &CacheKey,
        duration: i64,
        refresher: Arc<dyn Refresher>,
        force: bool,
    ) -> Result<Value, CacheError> {
        let bucket = self.bucket(&key.bucket, duration);
        bucket.touch(&key.name, Arc::clone(&refresher), self.clock.now_unix());

        let storage_key = storage_key(&self.prefix, &key.name);
        if force {
            self.store.del(&storage_key).await?;
            return refresher.refresh().await;
        }

        if let Some(raw) = self.store.get(&storage_key).await? {
            return Ok(serde_json::from_str(&raw)?);
        }

        let value = refresher.refresh().await?;
        let raw = serde_json::to_string(&value)?;
        let mut ttl = bucket.storage_ttl();
        if ttl == DAY_SECS {
            // Align one-day entries to expire just past the day boundary.
            ttl = self.clock.next_day_with_offset(DAY_ALIGN_OFFSET_SECS);
        }
        self.store.set_ex(&storage_key, &raw, ttl).await?;
        Ok(value)
    }

    /// Sweeps every bucket; a failing bucket is retried once before the
    /// failure is logged and the sweep moves on.
    pub async fn refresh_all(&self) {
        let buckets: Vec<(String, Arc<Bucket>)> = self
            .buckets
            .read()
            .iter()
            .map(|(name, bucket)| (name.clone(), Arc::clone(bucket)))
            .collect();

        for (name, bucket) in buckets {
            if let Err(err) = bucket
                .refresh_due(self.store.as_ref(), &self.clock, &self.prefix)
                .await
            {
                warn!(bucket = %name, %err, "Bucket refresh failed, retrying");
                if let Err(err) = bucket
                    .refresh_due(self.store.as_ref(), &self.clock, &self.prefix)
                    .await
                {
                    error!(bucket = %name, %err, "Bucket refresh failed");
                }
            }
        }
    }

    /// Sweeps one named bucket immediately.
    pub async fn refresh_bucket(&self, name: &str) -> Result<usize, CacheError> {
        let bucket = match self.buckets.read().get(name) {
            Some(bucket) => Arc::clone(bucket),
            None => return Ok(0),
        };
        bucket
            .refresh_due(self.store.as_ref(), &self.clock, &self.prefix)
            .await
    }
}
