//! # Updater
//!
//! One refresh run: fetch the listing once, fan out one task per month
//! link, collect each bucket into its own accumulator, and write finished
//! buckets to the store. A failing bucket never aborts the others.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::cache::store::{CacheEntry, ReleaseStore};
use crate::crawling::fetcher::Fetcher;
use crate::domain::{
    CacheBucketKey, ReleaseError, ReleaseEvent, TimeBucket, Whitelist, WhitelistFingerprint, WhitelistProvider,
};
use crate::infrastructure::config::CacheConfig;
use crate::infrastructure::parsing::reduce_candidates;
use crate::infrastructure::persistence::PersistenceSink;

/// Anything that can run a refresh for a set of buckets.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self, buckets: BTreeSet<TimeBucket>) -> RefreshReport;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BucketOutcome {
    Populated { records: usize, links: usize },
    Empty,
    Failed {
        #[serde(serialize_with = "serialize_error")]
        error: ReleaseError,
    },
}

fn serialize_error<S: serde::Serializer>(error: &ReleaseError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

impl BucketOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Populated { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: BTreeMap<TimeBucket, BucketOutcome>,
}

impl RefreshReport {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            outcomes: BTreeMap::new(),
        }
    }

    fn fail_all<'a>(&mut self, buckets: impl IntoIterator<Item = &'a TimeBucket>, error: &ReleaseError) {
        for bucket in buckets {
            self.outcomes.insert(
                bucket.clone(),
                BucketOutcome::Failed {
                    error: error.clone(),
                },
            );
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn outcome(&self, bucket: &TimeBucket) -> Option<&BucketOutcome> {
        self.outcomes.get(bucket)
    }

    pub fn successful(&self) -> Vec<&TimeBucket> {
        self.buckets_where(|o| matches!(o, BucketOutcome::Populated { .. }))
    }

    pub fn failed(&self) -> Vec<&TimeBucket> {
        self.buckets_where(|o| matches!(o, BucketOutcome::Failed { .. }))
    }

    pub fn empty(&self) -> Vec<&TimeBucket> {
        self.buckets_where(|o| matches!(o, BucketOutcome::Empty))
    }

    fn buckets_where(&self, pred: impl Fn(&BucketOutcome) -> bool) -> Vec<&TimeBucket> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(bucket, _)| bucket)
            .collect()
    }
}

impl Default for RefreshReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Hard ceilings for one refresh run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdaterDeadlines {
    pub refresh: Duration,
    pub bucket: Duration,
    pub link: Duration,
}

impl From<&CacheConfig> for UpdaterDeadlines {
    fn from(config: &CacheConfig) -> Self {
        Self {
            refresh: config.refresh_deadline(),
            bucket: config.bucket_deadline(),
            link: config.link_deadline(),
        }
    }
}

/// Per-bucket arena; lives for one refresh call only.
type Accumulator = Arc<Mutex<Vec<(usize, Vec<ReleaseEvent>)>>>;

pub struct Updater {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<ReleaseStore>,
    whitelist: Arc<dyn WhitelistProvider>,
    sink: Option<Arc<dyn PersistenceSink>>,
    deadlines: UpdaterDeadlines,
    shutdown: CancellationToken,
}

impl Updater {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<ReleaseStore>,
        whitelist: Arc<dyn WhitelistProvider>,
        deadlines: UpdaterDeadlines,
    ) -> Self {
        Self {
            fetcher,
            store,
            whitelist,
            sink: None,
            deadlines,
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Cancels every running and future refresh.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn run_buckets(
        &self,
        buckets: &[TimeBucket],
        members: &Whitelist,
        fingerprint: &WhitelistFingerprint,
        cancel: &CancellationToken,
        outcomes: &Mutex<BTreeMap<TimeBucket, BucketOutcome>>,
    ) {
        let links = match self.fetcher.fetch_link_list(buckets, cancel).await {
            Ok(links) => links,
            Err(e) => {
                error!("Link list fetch failed, no bucket can refresh: {}", e);
                let mut outcomes = outcomes.lock().await;
                for bucket in buckets {
                    outcomes.insert(bucket.clone(), BucketOutcome::Failed { error: e.clone() });
                }
                return;
            }
        };

        let runs = buckets.iter().map(|bucket| {
            let bucket_links: Vec<Url> = links
                .iter()
                .filter(|link| bucket.matches_link(link.as_str()))
                .cloned()
                .collect();
            async move {
                let outcome = self
                    .refresh_bucket(bucket, bucket_links, members, fingerprint, cancel)
                    .await;
                outcomes.lock().await.insert(bucket.clone(), outcome);
            }
        });
        futures::future::join_all(runs).await;
    }

    #[instrument(skip_all, fields(bucket = %bucket, links = links.len()))]
    async fn refresh_bucket(
        &self,
        bucket: &TimeBucket,
        links: Vec<Url>,
        members: &Whitelist,
        fingerprint: &WhitelistFingerprint,
        cancel: &CancellationToken,
    ) -> BucketOutcome {
        if links.is_empty() {
            info!("No schedule links for bucket '{}'", bucket);
            return BucketOutcome::Empty;
        }

        let accumulator: Accumulator = Arc::new(Mutex::new(Vec::new()));
        let bucket_cancel = cancel.child_token();
        let mut tasks = JoinSet::new();

        for (index, link) in links.iter().cloned().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let accumulator = Arc::clone(&accumulator);
            let token = bucket_cancel.clone();
            let bucket = bucket.clone();
            let members = members.clone();
            let link_deadline = self.deadlines.link;

            tasks.spawn(async move {
                let fetched = tokio::time::timeout(
                    link_deadline,
                    fetcher.fetch_and_parse(&link, &bucket, &members, &token),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(ReleaseError::ParseTimeout {
                        url: link.to_string(),
                    })
                });

                let records = fetched.inspect_err(|e| warn!("Link {} failed: {}", link, e))?;
                let mut slot = accumulator.lock().await;
                if token.is_cancelled() {
                    return Err(ReleaseError::Cancelled);
                }
                slot.push((index, records));
                Ok(())
            });
        }

        let mut successes = 0usize;
        let mut last_error = None;
        let drained = tokio::time::timeout(self.deadlines.bucket, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(())) => successes += 1,
                    Ok(Err(e)) => last_error = Some(e),
                    Err(join_error) => {
                        last_error = Some(ReleaseError::fetch_failed(
                            bucket.label(),
                            format!("link task panicked: {join_error}"),
                        ));
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Bucket '{}' exceeded its deadline", bucket);
            bucket_cancel.cancel();
            tasks.detach_all();
            return BucketOutcome::Failed {
                error: ReleaseError::ParseTimeout {
                    url: bucket.label().to_string(),
                },
            };
        }

        if successes == 0 {
            if let Some(error) = last_error {
                return BucketOutcome::Failed { error };
            }
        }

        let mut batches = std::mem::take(&mut *accumulator.lock().await);
        batches.sort_by_key(|(index, _)| *index);
        let records = merge_batches(batches.into_iter().map(|(_, records)| records));

        if records.is_empty() {
            info!("Bucket '{}' has no releases this cycle", bucket);
            return BucketOutcome::Empty;
        }

        let outcome = BucketOutcome::Populated {
            records: records.len(),
            links: links.len(),
        };
        self.persist_detached(bucket, &records);
        self.store
            .put(
                CacheBucketKey::new(bucket.clone(), fingerprint.clone()),
                CacheEntry::new(records, links),
            )
            .await;
        outcome
    }

    fn persist_detached(&self, bucket: &TimeBucket, records: &[ReleaseEvent]) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let bucket = bucket.clone();
        let records = records.to_vec();
        tokio::spawn(async move {
            if let Err(e) = sink.persist(&bucket, &records).await {
                warn!("Persisting bucket '{}' failed: {}", bucket, e);
            }
        });
    }
}

#[async_trait]
impl Refresher for Updater {
    #[instrument(skip_all, fields(buckets = buckets.len()))]
    async fn refresh(&self, buckets: BTreeSet<TimeBucket>) -> RefreshReport {
        let mut report = RefreshReport::new();
        if buckets.is_empty() {
            return report.finish();
        }
        let requested: Vec<TimeBucket> = buckets.into_iter().collect();

        let members = self.whitelist.united_members().await;
        if members.is_empty() {
            warn!("Refresh skipped: whitelist is empty");
            report.fail_all(&requested, &ReleaseError::EmptyWhitelist);
            return report.finish();
        }
        let fingerprint = WhitelistFingerprint::of(&members);
        info!("Refresh {} started for {} buckets", report.run_id, requested.len());

        let cancel = self.shutdown.child_token();
        let outcomes = Mutex::new(BTreeMap::new());
        let completed = tokio::time::timeout(
            self.deadlines.refresh,
            self.run_buckets(&requested, &members, &fingerprint, &cancel, &outcomes),
        )
        .await;
        if completed.is_err() {
            error!("Refresh {} exceeded its deadline", report.run_id);
            cancel.cancel();
        }

        report.outcomes = outcomes.into_inner();
        let unfinished: Vec<TimeBucket> = requested
            .iter()
            .filter(|b| !report.outcomes.contains_key(*b))
            .cloned()
            .collect();
        report.fail_all(&unfinished, &ReleaseError::Cancelled);

        let report = report.finish();
        info!(
            "Refresh {} finished: {} populated, {} empty, {} failed",
            report.run_id,
            report.successful().len(),
            report.empty().len(),
            report.failed().len()
        );
        report
    }
}

/// Merge per-link batches into one date-ordered list, one record per `(entity, date)`.
pub fn merge_batches<I>(batches: I) -> Vec<ReleaseEvent>
where
    I: IntoIterator<Item = Vec<ReleaseEvent>>,
{
    let mut candidates: BTreeMap<(NaiveDate, String), Vec<ReleaseEvent>> = BTreeMap::new();
    for record in batches.into_iter().flatten() {
        candidates
            .entry((record.date(), record.entity_key()))
            .or_default()
            .push(record);
    }
    candidates.into_values().filter_map(reduce_candidates).collect()
}
