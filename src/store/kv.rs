//! TTL key-value collaborator contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::StoreError;
use crate::time::Clock;

/// A key-value store where every entry carries a time-to-live.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Returns the stored value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` with a TTL of `ttl_secs` seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), StoreError>;

    /// Deletes the entry, if present.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Remaining TTL in seconds, or `None` if the key is absent or expired.
    async fn ttl(&self, key: &str) -> Result<Option<i64>, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: i64,
}

/// In-memory [`TtlStore`]. Expiry is evaluated lazily against the shared
/// [`Clock`], so tests with a pinned clock see deterministic TTLs.
pub struct MemoryTtlStore {
    clock: Arc<Clock>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryTtlStore {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn live_entry(&self, key: &str) -> Option<Entry> {
        let entry = self.entries.read().get(key).cloned()?;
        if entry.expires_at <= self.clock.now_unix() {
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_entry(key).map(|e| e.value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), StoreError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: self.clock.now_unix() + ttl_secs,
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .live_entry(key)
            .map(|e| e.expires_at - self.clock.now_unix()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pinned_store(epoch: i64) -> (Arc<Clock>, MemoryTtlStore) {
        let clock = Arc::new(Clock::new());
        clock.pin(epoch);
        let store = MemoryTtlStore::new(Arc::clone(&clock));
        (clock, store)
    }

    #[tokio::test]
    async fn set_get_del() {
        let (_clock, store) = pinned_store(1_000);
        store.set_ex("k", "v", 60).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let (clock, store) = pinned_store(1_000);
        store.set_ex("k", "v", 60).await.unwrap();

        clock.pin(1_059);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.ttl("k").await.unwrap(), Some(1));

        clock.pin(1_060);
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_of_missing_key_is_none() {
        let (_clock, store) = pinned_store(1_000);
        assert_eq!(store.ttl("nope").await.unwrap(), None);
    }
}
