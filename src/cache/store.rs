//! # Release Store
//!
//! Cache entries and pending-refresh marks, each map behind its own lock.
//! Entries are replaced whole, never edited in place, so readers clone an
//! `Arc` and drop the lock immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::domain::whitelist::is_member;
use crate::domain::{
    CacheBucketKey, ReleaseError, ReleaseEvent, ReleaseResult, TimeBucket, Whitelist, WhitelistFingerprint,
};
use crate::infrastructure::config::CacheConfig;

/// One refreshed bucket
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub records: Vec<ReleaseEvent>,
    pub links: Vec<Url>,
    pub fetched_at: DateTime<Utc>,
    fetched_instant: Instant,
}

impl CacheEntry {
    pub fn new(records: Vec<ReleaseEvent>, links: Vec<Url>) -> Self {
        Self {
            records,
            links,
            fetched_at: Utc::now(),
            fetched_instant: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.fetched_instant.elapsed()
    }

    /// An entry exactly at its TTL is already expired.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}

/// Marks a bucket whose refresh is scheduled or running
#[derive(Debug, Clone)]
pub struct PendingUpdateMark {
    pub bucket: TimeBucket,
    pub started_at: DateTime<Utc>,
    started_instant: Instant,
    seq: u64,
}

impl PendingUpdateMark {
    fn new(bucket: TimeBucket, seq: u64) -> Self {
        Self {
            bucket,
            started_at: Utc::now(),
            started_instant: Instant::now(),
            seq,
        }
    }

    fn is_stale(&self, stale_after: Duration) -> bool {
        self.started_instant.elapsed() >= stale_after
    }
}

/// Active buckets (previous, current and next month) expire sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub active: Duration,
    pub inactive: Duration,
}

impl TtlPolicy {
    pub const fn uniform(ttl: Duration) -> Self {
        Self {
            active: ttl,
            inactive: ttl,
        }
    }

    pub fn ttl_for(&self, bucket: &TimeBucket, today: NaiveDate) -> Duration {
        if bucket.is_active(today) {
            self.active
        } else {
            self.inactive
        }
    }
}

impl From<&CacheConfig> for TtlPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            active: config.active_ttl(),
            inactive: config.inactive_ttl(),
        }
    }
}

/// Result of a cache lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub records: Vec<ReleaseEvent>,
    pub missing: Vec<TimeBucket>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub expired_entries: usize,
    pub pending: usize,
}

#[derive(Debug)]
pub struct ReleaseStore {
    entries: RwLock<HashMap<CacheBucketKey, Arc<CacheEntry>>>,
    pending: RwLock<HashMap<CacheBucketKey, PendingUpdateMark>>,
    next_mark: AtomicU64,
    ttl: TtlPolicy,
    pending_stale_after: Duration,
}

impl ReleaseStore {
    pub fn new(ttl: TtlPolicy, pending_stale_after: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            next_mark: AtomicU64::new(0),
            ttl,
            pending_stale_after,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(TtlPolicy::from(config), config.pending_stale_after())
    }

    pub const fn ttl_policy(&self) -> TtlPolicy {
        self.ttl
    }

    fn today() -> NaiveDate {
        chrono::Local::now().date_naive()
    }

    /// Fresh records for `buckets` under `fingerprint`, narrowed to `whitelist`.
    ///
    /// Buckets without a live entry are reported in `missing`.
    pub async fn query(
        &self,
        buckets: &[TimeBucket],
        fingerprint: &WhitelistFingerprint,
        whitelist: &Whitelist,
    ) -> ReleaseResult<QueryResult> {
        if whitelist.is_empty() {
            return Err(ReleaseError::EmptyWhitelist);
        }

        let today = Self::today();
        let entries = self.entries.read().await;
        let mut result = QueryResult::default();

        for bucket in buckets {
            let key = CacheBucketKey::new(bucket.clone(), fingerprint.clone());
            match entries.get(&key) {
                Some(entry) if !entry.is_expired(self.ttl.ttl_for(bucket, today)) => {
                    result.records.extend(
                        entry
                            .records
                            .iter()
                            .filter(|r| is_member(whitelist, r.entity_name()))
                            .cloned(),
                    );
                }
                _ => result.missing.push(bucket.clone()),
            }
        }
        Ok(result)
    }

    pub async fn get(&self, key: &CacheBucketKey) -> Option<Arc<CacheEntry>> {
        self.entries.read().await.get(key).cloned()
    }

    /// Replace the entry for `key`.
    pub async fn put(&self, key: CacheBucketKey, entry: CacheEntry) {
        debug!("Caching {} records for {}", entry.records.len(), key);
        self.entries.write().await.insert(key, Arc::new(entry));
    }

    /// Mark `keys` pending; returns the keys that were not already pending.
    pub async fn mark_pending(&self, keys: &[CacheBucketKey]) -> Vec<CacheBucketKey> {
        let mut pending = self.pending.write().await;
        let mut marked = Vec::new();
        for key in keys {
            let live = pending
                .get(key)
                .is_some_and(|mark| !mark.is_stale(self.pending_stale_after));
            if !live {
                let seq = self.next_mark.fetch_add(1, Ordering::SeqCst);
                pending.insert(key.clone(), PendingUpdateMark::new(key.bucket.clone(), seq));
                marked.push(key.clone());
            }
        }
        marked
    }

    /// True when `key` carries a live mark. Stale marks are cleared.
    pub async fn is_pending(&self, key: &CacheBucketKey) -> bool {
        {
            let pending = self.pending.read().await;
            match pending.get(key) {
                None => return false,
                Some(mark) if !mark.is_stale(self.pending_stale_after) => return true,
                Some(_) => {}
            }
        }

        let mut pending = self.pending.write().await;
        if pending
            .get(key)
            .is_some_and(|mark| mark.is_stale(self.pending_stale_after))
        {
            info!("Clearing abandoned pending mark for {}", key);
            pending.remove(key);
            return false;
        }
        pending.contains_key(key)
    }

    pub async fn pending_mark(&self, key: &CacheBucketKey) -> Option<PendingUpdateMark> {
        self.pending.read().await.get(key).cloned()
    }

    /// Sequence number the next pending mark will carry.
    pub fn mark_epoch(&self) -> u64 {
        self.next_mark.load(Ordering::SeqCst)
    }

    /// Clear the marks on `keys` created before `epoch`. Later marks are kept.
    pub async fn clear_pending_before(&self, keys: &[CacheBucketKey], epoch: u64) {
        let mut pending = self.pending.write().await;
        for key in keys {
            if pending.get(key).is_some_and(|mark| mark.seq < epoch) {
                pending.remove(key);
            }
        }
    }

    /// Drop every entry and pending mark.
    pub async fn invalidate(&self) {
        let (mut entries, mut pending) = (self.entries.write().await, self.pending.write().await);
        info!(
            "Invalidating cache: {} entries, {} pending marks",
            entries.len(),
            pending.len()
        );
        entries.clear();
        pending.clear();
    }

    pub async fn stats(&self) -> StoreStats {
        let today = Self::today();
        let entries = self.entries.read().await;
        let expired_entries = entries
            .iter()
            .filter(|(key, entry)| entry.is_expired(self.ttl.ttl_for(&key.bucket, today)))
            .count();
        let entry_count = entries.len();
        drop(entries);

        StoreStats {
            entries: entry_count,
            expired_entries,
            pending: self.pending.read().await.len(),
        }
    }
}
