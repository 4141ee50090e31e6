//! Self-refreshing read-through cache keyed by access recency.
//!
//! Values are stored as JSON in a TTL key-value collaborator. Every
//! read-through access bumps a recency record under the key's duration
//! bucket; a periodic sweep ([`RefreshExecutor`]) re-invokes the
//! refresher for keys accessed within the last `duration` seconds,
//! rewriting them ahead of expiry. Idle keys are simply left to expire -
//! no explicit unregistration exists or is needed.
//!
//! The storage TTL is decoupled from the poll cadence: a refreshed entry
//! lives `min(duration * 10, 2 days)` so a stalled sweep degrades to
//! stale-but-served data rather than misses.

mod registry;
mod updater;

pub use registry::{Bucket, CacheKey, WarmCache, MAX_STORAGE_TTL_SECS};
pub use updater::{RefreshExecutor, CACHE_UPDATE_EXECUTOR};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::store::StoreError;

/// Errors from cache reads and refresh sweeps.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The refresher could not produce a fresh value.
    #[error("refresh failed: {0}")]
    Refresh(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored value or a produced value could not be (de)serialized.
    #[error("cache value codec failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Capability to produce a fresh value for one cache key.
///
/// Implemented per call site and stored by key, replacing ad-hoc captured
/// closures so the refresh path has no ambiguous mutable state.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self) -> Result<Value, CacheError>;
}

/// Adapter for synchronous producer closures.
pub struct FnRefresher<F>(pub F);

#[async_trait]
impl<F> Refresher for FnRefresher<F>
where
    F: Fn() -> Result<Value, CacheError> + Send + Sync,
{
    async fn refresh(&self) -> Result<Value, CacheError> {
        (self.0)()
    }
}
