//! Schedule cache
//!
//! [`ScheduleCache`] is the surface front ends talk to: non-blocking
//! queries against the store, debounced refresh scheduling, invalidation
//! and pending checks. Entries are keyed by the fingerprint of the united
//! whitelist; each query narrows them to the caller's own whitelist.

pub mod scheduler;
pub mod store;

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

pub use scheduler::{RefreshScheduler, SchedulerState};
pub use store::{CacheEntry, PendingUpdateMark, QueryResult, ReleaseStore, StoreStats, TtlPolicy};

use crate::crawling::updater::Refresher;
use crate::domain::{
    CacheBucketKey, ReleaseError, ReleaseEvent, ReleaseResult, TimeBucket, Whitelist, WhitelistFingerprint,
    WhitelistProvider,
};
use crate::infrastructure::config::CacheConfig;

/// Formatted query result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormattedQuery {
    pub lines: Vec<String>,
    pub missing: Vec<TimeBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub expired_entries: usize,
    pub pending: usize,
    pub scheduler: SchedulerState,
    pub refresh_runs: u64,
}

pub struct ScheduleCache {
    store: Arc<ReleaseStore>,
    scheduler: RefreshScheduler,
    whitelist: Arc<dyn WhitelistProvider>,
}

impl ScheduleCache {
    /// Wire a cache around an existing store; `refresher` must write into the same store.
    pub fn new(
        store: Arc<ReleaseStore>,
        refresher: Arc<dyn Refresher>,
        whitelist: Arc<dyn WhitelistProvider>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            scheduler: RefreshScheduler::new(refresher, Arc::clone(&store), config.debounce()),
            store,
            whitelist,
        }
    }

    pub fn store(&self) -> &Arc<ReleaseStore> {
        &self.store
    }

    async fn united_fingerprint(&self) -> WhitelistFingerprint {
        WhitelistFingerprint::of(&self.whitelist.united_members().await)
    }

    async fn keys_for(&self, buckets: &[TimeBucket]) -> Vec<CacheBucketKey> {
        let fingerprint = self.united_fingerprint().await;
        buckets
            .iter()
            .map(|b| CacheBucketKey::new(b.clone(), fingerprint.clone()))
            .collect()
    }

    /// Cached records for `buckets` filtered to `whitelist`; never touches the network.
    pub async fn query(&self, buckets: &[TimeBucket], whitelist: &Whitelist) -> ReleaseResult<QueryResult> {
        if whitelist.is_empty() {
            return Err(ReleaseError::EmptyWhitelist);
        }
        let fingerprint = self.united_fingerprint().await;
        self.store.query(buckets, &fingerprint, whitelist).await
    }

    /// Like [`Self::query`], rendering every record with `formatter`.
    pub async fn query_formatted<F>(
        &self,
        buckets: &[TimeBucket],
        whitelist: &Whitelist,
        formatter: F,
    ) -> ReleaseResult<FormattedQuery>
    where
        F: Fn(&ReleaseEvent) -> String,
    {
        let result = self.query(buckets, whitelist).await?;
        Ok(FormattedQuery {
            lines: result.records.iter().map(formatter).collect(),
            missing: result.missing,
        })
    }

    /// Debounced refresh of `buckets`. Returns false when all of them were already pending.
    pub async fn schedule_refresh(&self, buckets: &[TimeBucket]) -> bool {
        let keys = self.keys_for(buckets).await;
        self.scheduler.trigger(&keys).await
    }

    pub async fn is_pending_for(&self, bucket: &TimeBucket) -> bool {
        let fingerprint = self.united_fingerprint().await;
        self.store
            .is_pending(&CacheBucketKey::new(bucket.clone(), fingerprint))
            .await
    }

    /// Drop all entries and pending marks. Does not schedule a refresh.
    pub async fn invalidate(&self) {
        info!("Cache invalidated");
        self.store.invalidate().await;
    }

    pub async fn stats(&self) -> CacheStats {
        let store = self.store.stats().await;
        CacheStats {
            entries: store.entries,
            expired_entries: store.expired_entries,
            pending: store.pending,
            scheduler: self.scheduler.state().await,
            refresh_runs: self.scheduler.runs().await,
        }
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
