//! # Refresh Scheduler
//!
//! Debounces refresh triggers: `Idle → Scheduled → Running → Idle`.
//!
//! Every trigger that adds work moves the scheduler to `Scheduled` with a new
//! generation and restarts the single timer. A timer only fires the refresh
//! if its generation is still current, so a timer that wakes while being
//! replaced does nothing. Triggers arriving while `Running` are queued and
//! start a fresh timer once the run ends.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::store::ReleaseStore;
use crate::crawling::updater::Refresher;
use crate::domain::{CacheBucketKey, TimeBucket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Running,
}

#[derive(Debug)]
struct Inner {
    state: SchedulerState,
    generation: u64,
    scheduled: BTreeSet<CacheBucketKey>,
    queued: BTreeSet<CacheBucketKey>,
    timer: Option<JoinHandle<()>>,
    runs: u64,
}

#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<Mutex<Inner>>,
    refresher: Arc<dyn Refresher>,
    store: Arc<ReleaseStore>,
    debounce: Duration,
    shutdown: CancellationToken,
}

impl RefreshScheduler {
    pub fn new(refresher: Arc<dyn Refresher>, store: Arc<ReleaseStore>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SchedulerState::Idle,
                generation: 0,
                scheduled: BTreeSet::new(),
                queued: BTreeSet::new(),
                timer: None,
                runs: 0,
            })),
            refresher,
            store,
            debounce,
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        self.inner.lock().await.state
    }

    /// Completed refresh runs since construction.
    pub async fn runs(&self) -> u64 {
        self.inner.lock().await.runs
    }

    /// Schedule a refresh for `keys`.
    ///
    /// Keys that already carry a live pending mark are ignored; returns false
    /// when nothing new was scheduled.
    pub async fn trigger(&self, keys: &[CacheBucketKey]) -> bool {
        let fresh = self.store.mark_pending(keys).await;
        if fresh.is_empty() {
            debug!("Refresh already pending for {} keys", keys.len());
            return false;
        }

        let mut inner = self.inner.lock().await;
        match inner.state {
            SchedulerState::Running => {
                debug!("Refresh running, queueing {} keys", fresh.len());
                inner.queued.extend(fresh);
            }
            SchedulerState::Idle | SchedulerState::Scheduled => {
                inner.scheduled.extend(fresh);
                self.restart_timer(&mut inner);
            }
        }
        true
    }

    /// Stop the timer and refuse to fire again. Pending marks stay in place.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut inner = self.inner.lock().await;
        if let Some(timer) = inner.timer.take() {
            if inner.state == SchedulerState::Scheduled {
                timer.abort();
            }
        }
        inner.generation += 1;
        if inner.state == SchedulerState::Scheduled {
            inner.state = SchedulerState::Idle;
        }
    }

    fn restart_timer(&self, inner: &mut Inner) {
        inner.generation += 1;
        inner.state = SchedulerState::Scheduled;
        if let Some(previous) = inner.timer.take() {
            previous.abort();
        }

        let generation = inner.generation;
        let this = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(this.debounce) => this.clone().fire(generation).await,
                () = this.shutdown.cancelled() => {}
            }
        }));
    }

    fn fire(self, generation: u64) -> BoxFuture<'static, ()> {
        async move { self.run_if_current(generation).await }.boxed()
    }

    async fn run_if_current(&self, generation: u64) {
        let (keys, epoch) = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation || inner.state != SchedulerState::Scheduled {
                debug!("Ignoring superseded refresh timer (generation {})", generation);
                return;
            }
            inner.state = SchedulerState::Running;
            // The running task must not be aborted by a later restart
            inner.timer = None;
            (std::mem::take(&mut inner.scheduled), self.store.mark_epoch())
        };

        let buckets: BTreeSet<TimeBucket> = keys.iter().map(|k| k.bucket.clone()).collect();
        info!("Debounce elapsed, refreshing {} buckets", buckets.len());
        let report = self.refresher.refresh(buckets).await;
        debug!("Refresh {} done", report.run_id);

        let mut inner = self.inner.lock().await;
        // Keys re-triggered during the run keep their marks for the next one
        let finished: Vec<CacheBucketKey> = keys
            .into_iter()
            .filter(|key| !inner.queued.contains(key))
            .collect();
        self.store.clear_pending_before(&finished, epoch).await;
        inner.runs += 1;
        if inner.queued.is_empty() || self.shutdown.is_cancelled() {
            inner.state = SchedulerState::Idle;
        } else {
            let queued = std::mem::take(&mut inner.queued);
            inner.scheduled.extend(queued);
            self.restart_timer(&mut inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::TtlPolicy;
    use crate::crawling::updater::RefreshReport;
    use crate::domain::WhitelistFingerprint;
    use async_trait::async_trait;

    #[derive(Default)]
    struct CountingRefresher {
        calls: Mutex<Vec<BTreeSet<TimeBucket>>>,
    }

    #[async_trait]
    impl Refresher for CountingRefresher {
        async fn refresh(&self, buckets: BTreeSet<TimeBucket>) -> RefreshReport {
            self.calls.lock().await.push(buckets);
            RefreshReport::new()
        }
    }

    struct SlowRefresher {
        calls: Mutex<u32>,
        delay: Duration,
    }

    #[async_trait]
    impl Refresher for SlowRefresher {
        async fn refresh(&self, _buckets: BTreeSet<TimeBucket>) -> RefreshReport {
            *self.calls.lock().await += 1;
            tokio::time::sleep(self.delay).await;
            RefreshReport::new()
        }
    }

    const DEBOUNCE: Duration = Duration::from_secs(60);

    fn setup() -> (RefreshScheduler, Arc<CountingRefresher>, Arc<ReleaseStore>) {
        let refresher = Arc::new(CountingRefresher::default());
        let store = Arc::new(ReleaseStore::new(
            TtlPolicy::uniform(Duration::from_secs(1800)),
            Duration::from_secs(300),
        ));
        let scheduler = RefreshScheduler::new(refresher.clone(), store.clone(), DEBOUNCE);
        (scheduler, refresher, store)
    }

    fn key(bucket: &str) -> CacheBucketKey {
        CacheBucketKey::new(TimeBucket::new(bucket), WhitelistFingerprint::of(["aespa"]))
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_triggers_collapse_into_one_run() {
        let (scheduler, refresher, store) = setup();

        assert!(scheduler.trigger(&[key("may-2024")]).await);
        for _ in 0..5 {
            assert!(!scheduler.trigger(&[key("may-2024")]).await);
        }
        assert_eq!(scheduler.state().await, SchedulerState::Scheduled);

        tokio::time::sleep(DEBOUNCE + Duration::from_secs(1)).await;
        assert_eq!(refresher.calls.lock().await.len(), 1);
        assert_eq!(scheduler.state().await, SchedulerState::Idle);
        assert!(!store.is_pending(&key("may-2024")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn new_buckets_restart_the_timer() {
        let (scheduler, refresher, _) = setup();

        scheduler.trigger(&[key("may-2024")]).await;
        tokio::time::sleep(Duration::from_secs(40)).await;
        scheduler.trigger(&[key("june-2024")]).await;

        // The first timer would have fired here
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(refresher.calls.lock().await.is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        let calls = refresher.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retrigger_during_run_stays_pending() {
        let refresher = Arc::new(SlowRefresher {
            calls: Mutex::new(0),
            delay: Duration::from_secs(30),
        });
        let store = Arc::new(ReleaseStore::new(
            TtlPolicy::uniform(Duration::from_secs(1800)),
            Duration::from_secs(300),
        ));
        let scheduler = RefreshScheduler::new(refresher.clone(), store.clone(), DEBOUNCE);

        scheduler.trigger(&[key("may-2024")]).await;
        tokio::time::sleep(DEBOUNCE + Duration::from_secs(1)).await;
        assert_eq!(scheduler.state().await, SchedulerState::Running);

        store.invalidate().await;
        assert!(scheduler.trigger(&[key("may-2024")]).await);
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(scheduler.state().await, SchedulerState::Scheduled);
        assert!(store.is_pending(&key("may-2024")).await);

        tokio::time::sleep(DEBOUNCE + Duration::from_secs(31)).await;
        assert_eq!(*refresher.calls.lock().await, 2);
        assert!(!store.is_pending(&key("may-2024")).await);
        assert_eq!(scheduler.state().await, SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_the_timer() {
        let (scheduler, refresher, _) = setup();
        scheduler.trigger(&[key("may-2024")]).await;
        scheduler.shutdown().await;

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(refresher.calls.lock().await.is_empty());
        assert_eq!(scheduler.state().await, SchedulerState::Idle);
    }
}
