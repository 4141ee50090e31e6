//! Busy executor that drives the periodic cache refresh sweep.

use std::sync::Arc;

use async_trait::async_trait;

use super::WarmCache;
use crate::runtime::{ExecContext, ExecError, Executor};

/// Registered name of the cache refresh executor.
pub const CACHE_UPDATE_EXECUTOR: &str = "cache_update";

/// Runs [`WarmCache::refresh_all`] as a busy executor, so recently-read
/// entries are rewritten ahead of expiry.
pub struct RefreshExecutor {
    cache: Arc<WarmCache>,
}

impl RefreshExecutor {
    pub fn new(cache: Arc<WarmCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Executor for RefreshExecutor {
    fn name(&self) -> &str {
        CACHE_UPDATE_EXECUTOR
    }

    fn description(&self) -> &str {
        "refreshes recently-read cache entries ahead of expiry"
    }

    fn next_duration(&self) -> i64 {
        0
    }

    async fn process(&self, _ctx: &ExecContext) -> Result<(), ExecError> {
        self.cache.refresh_all().await;
        Ok(())
    }
}
