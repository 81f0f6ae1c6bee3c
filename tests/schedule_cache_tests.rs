//! ScheduleCache behaviour: debounce, pending marks, TTL and formatted queries
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use comeback_radar_lib::cache::{CacheEntry, ReleaseStore, ScheduleCache, SchedulerState, TtlPolicy};
use comeback_radar_lib::crawling::{BucketOutcome, RefreshReport, Refresher};
use comeback_radar_lib::domain::{
    CacheBucketKey, InMemoryWhitelist, ReleaseError, ReleaseEvent, TimeBucket, WhitelistFingerprint,
    WhitelistProvider, format_release, whitelist_of,
};
use comeback_radar_lib::infrastructure::CacheConfig;

const DEBOUNCE: Duration = Duration::from_secs(60);
const TTL: Duration = Duration::from_secs(1800);

/// Writes two canned records per bucket into the shared store.
struct StubRefresher {
    store: Arc<ReleaseStore>,
    whitelist: Arc<InMemoryWhitelist>,
    runs: Mutex<Vec<BTreeSet<TimeBucket>>>,
}

#[async_trait]
impl Refresher for StubRefresher {
    async fn refresh(&self, buckets: BTreeSet<TimeBucket>) -> RefreshReport {
        self.runs.lock().await.push(buckets.clone());
        let fingerprint = WhitelistFingerprint::of(&self.whitelist.united_members().await);
        let day = NaiveDate::from_ymd_opt(2024, 5, 27).unwrap();

        let mut report = RefreshReport::new();
        for bucket in buckets {
            let records = vec![
                ReleaseEvent::new("aespa", day).with_lead_track_title(Some("Supernova".into())),
                ReleaseEvent::new("IVE", day).with_collection_title(Some("Switch".into())),
            ];
            self.store
                .put(
                    CacheBucketKey::new(bucket.clone(), fingerprint.clone()),
                    CacheEntry::new(records, Vec::new()),
                )
                .await;
            report
                .outcomes
                .insert(bucket, BucketOutcome::Populated { records: 2, links: 1 });
        }
        report
    }
}

struct Harness {
    cache: ScheduleCache,
    refresher: Arc<StubRefresher>,
    whitelist: Arc<InMemoryWhitelist>,
}

async fn harness() -> Harness {
    let config = CacheConfig {
        debounce_seconds: DEBOUNCE.as_secs(),
        ..CacheConfig::default()
    };
    let store = Arc::new(ReleaseStore::new(TtlPolicy::uniform(TTL), Duration::from_secs(300)));
    let whitelist = Arc::new(InMemoryWhitelist::with_scope("chat:1", ["aespa"]));
    let refresher = Arc::new(StubRefresher {
        store: store.clone(),
        whitelist: whitelist.clone(),
        runs: Mutex::default(),
    });
    whitelist.add("chat:2", "IVE").await;

    Harness {
        cache: ScheduleCache::new(store, refresher.clone(), whitelist.clone(), &config),
        refresher,
        whitelist,
    }
}

fn may() -> Vec<TimeBucket> {
    vec![TimeBucket::new("may-2024")]
}

#[tokio::test(start_paused = true)]
async fn burst_of_triggers_runs_one_refresh() {
    let h = harness().await;

    assert!(h.cache.schedule_refresh(&may()).await);
    for _ in 0..10 {
        assert!(!h.cache.schedule_refresh(&may()).await);
    }
    assert!(h.cache.is_pending_for(&may()[0]).await);
    assert_eq!(h.cache.stats().await.scheduler, SchedulerState::Scheduled);

    tokio::time::sleep(DEBOUNCE + Duration::from_secs(1)).await;

    assert_eq!(h.refresher.runs.lock().await.len(), 1);
    assert!(!h.cache.is_pending_for(&may()[0]).await);
    let stats = h.cache.stats().await;
    assert_eq!(stats.refresh_runs, 1);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.scheduler, SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn query_never_waits_for_the_refresh() {
    let h = harness().await;
    let members = h.whitelist.members_for("chat:1").await;

    let before = h.cache.query(&may(), &members).await.unwrap();
    assert!(before.records.is_empty());
    assert_eq!(before.missing, may());

    h.cache.schedule_refresh(&may()).await;
    let still_missing = h.cache.query(&may(), &members).await.unwrap();
    assert_eq!(still_missing.missing, may());

    tokio::time::sleep(DEBOUNCE * 2).await;
    let after = h.cache.query(&may(), &members).await.unwrap();
    assert!(after.missing.is_empty());
    assert_eq!(after.records.len(), 1);
    assert_eq!(after.records[0].entity_name(), "aespa");
}

#[tokio::test(start_paused = true)]
async fn formatted_query_uses_the_callback() {
    let h = harness().await;
    h.cache.schedule_refresh(&may()).await;
    tokio::time::sleep(DEBOUNCE * 2).await;

    let formatted = h
        .cache
        .query_formatted(&may(), &whitelist_of(["aespa", "ive"]), format_release)
        .await
        .unwrap();
    assert_eq!(
        formatted.lines,
        vec!["27.05.24 aespa - \"Supernova\"", "27.05.24 IVE (Switch)"]
    );

    let names = h
        .cache
        .query_formatted(&may(), &whitelist_of(["ive"]), |e| e.entity_name().to_uppercase())
        .await
        .unwrap();
    assert_eq!(names.lines, vec!["IVE"]);
}

#[tokio::test(start_paused = true)]
async fn entries_expire_exactly_at_the_ttl() {
    let h = harness().await;
    let members = whitelist_of(["aespa"]);
    h.cache.schedule_refresh(&may()).await;
    tokio::time::sleep(DEBOUNCE + Duration::from_secs(1)).await;

    tokio::time::advance(TTL - Duration::from_secs(2)).await;
    assert!(h.cache.query(&may(), &members).await.unwrap().missing.is_empty());

    tokio::time::advance(Duration::from_secs(2)).await;
    let expired = h.cache.query(&may(), &members).await.unwrap();
    assert_eq!(expired.missing, may());
    assert_eq!(h.cache.stats().await.expired_entries, 1);
}

#[tokio::test(start_paused = true)]
async fn invalidate_clears_entries_but_schedules_nothing() {
    let h = harness().await;
    h.cache.schedule_refresh(&may()).await;
    tokio::time::sleep(DEBOUNCE * 2).await;

    h.cache.invalidate().await;
    tokio::time::sleep(DEBOUNCE * 2).await;

    let stats = h.cache.stats().await;
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.refresh_runs, 1);
    assert_eq!(h.refresher.runs.lock().await.len(), 1);
}

#[tokio::test]
async fn empty_whitelist_query_is_an_error() {
    let h = harness().await;
    let err = h.cache.query(&may(), &whitelist_of(Vec::<String>::new())).await.unwrap_err();
    assert_eq!(err, ReleaseError::EmptyWhitelist);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drops_the_scheduled_run() {
    let h = harness().await;
    h.cache.schedule_refresh(&may()).await;
    h.cache.shutdown().await;

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert!(h.refresher.runs.lock().await.is_empty());
}
