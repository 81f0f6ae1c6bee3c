//! # Page Fetcher
//!
//! Fetches the listing page and month pages under a shared concurrency
//! limit, waits a randomized politeness delay before every request, and
//! retries transient failures with bounded exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::domain::{ReleaseError, ReleaseEvent, ReleaseResult, TimeBucket, Whitelist};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::PageSource;
use crate::infrastructure::parsing::{DateTimeNormalizer, LinkListParser, PageParser};
use crate::infrastructure::retry::RetryPolicy;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Month page links for `buckets`, read from the listing page.
    async fn fetch_link_list(
        &self,
        buckets: &[TimeBucket],
        cancel: &CancellationToken,
    ) -> ReleaseResult<Vec<Url>>;

    /// Fetch one month page and parse it for `bucket`.
    async fn fetch_and_parse(
        &self,
        url: &Url,
        bucket: &TimeBucket,
        whitelist: &Whitelist,
        cancel: &CancellationToken,
    ) -> ReleaseResult<Vec<ReleaseEvent>>;
}

/// Inclusive window for the randomized pre-request pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolitenessDelay {
    pub min: Duration,
    pub max: Duration,
}

impl PolitenessDelay {
    pub const NONE: Self = Self {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn sample(&self) -> Duration {
        let min = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        if max <= min {
            return self.min;
        }
        Duration::from_millis(fastrand::u64(min..=max))
    }
}

pub struct PageFetcher {
    source: Arc<dyn PageSource>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    politeness: PolitenessDelay,
    listing_url: Url,
    link_parser: LinkListParser,
    page_parser: Arc<PageParser>,
}

impl PageFetcher {
    pub fn new(config: &AppConfig, source: Arc<dyn PageSource>) -> ReleaseResult<Self> {
        let offset = config
            .timezone
            .offset()
            .ok_or_else(|| ReleaseError::configuration("timezone.local_offset_minutes", "out of range"))?;
        let normalizer = match config.source.fallback_year {
            Some(year) => DateTimeNormalizer::new(year, offset),
            None => DateTimeNormalizer::current_year(offset),
        };
        let listing_url = Url::parse(&config.source.listing_url)
            .map_err(|e| ReleaseError::configuration("source.listing_url", e.to_string()))?;

        Ok(Self {
            source,
            permits: Arc::new(Semaphore::new(config.fetch.max_concurrent.max(1))),
            retry: RetryPolicy::from(&config.fetch),
            politeness: PolitenessDelay {
                min: Duration::from_millis(config.fetch.politeness_delay_min_ms),
                max: Duration::from_millis(config.fetch.politeness_delay_max_ms),
            },
            listing_url,
            link_parser: LinkListParser::new(&config.source.selectors, &config.source.link_keyword)?,
            page_parser: Arc::new(PageParser::new(&config.source.selectors, normalizer)?),
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_politeness(mut self, politeness: PolitenessDelay) -> Self {
        self.politeness = politeness;
        self
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// One attempt: permit, politeness pause, request.
    async fn fetch_once(&self, url: &str, cancel: &CancellationToken) -> ReleaseResult<String> {
        let _permit = tokio::select! {
            permit = self.permits.acquire() => {
                permit.map_err(|e| ReleaseError::fetch_failed(url, format!("fetch limiter closed: {e}")))?
            }
            () = cancel.cancelled() => return Err(ReleaseError::Cancelled),
        };

        let pause = self.politeness.sample();
        if !pause.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = cancel.cancelled() => return Err(ReleaseError::Cancelled),
            }
        }

        self.source.get_text(url, cancel).await
    }

    async fn fetch_with_retry(&self, url: &str, cancel: &CancellationToken) -> ReleaseResult<String> {
        self.retry
            .run(url, cancel, |_| self.fetch_once(url, cancel))
            .await
            .map_err(|e| match e {
                ReleaseError::FetchFailed { .. } | ReleaseError::Cancelled => e,
                other => ReleaseError::fetch_failed(url, other),
            })
    }
}

#[async_trait]
impl Fetcher for PageFetcher {
    #[instrument(skip_all, fields(bucket_count = buckets.len()))]
    async fn fetch_link_list(
        &self,
        buckets: &[TimeBucket],
        cancel: &CancellationToken,
    ) -> ReleaseResult<Vec<Url>> {
        let html = self.fetch_with_retry(self.listing_url.as_str(), cancel).await?;
        Ok(self.link_parser.parse(&html, &self.listing_url, buckets))
    }

    #[instrument(skip_all, fields(url = %url, bucket = %bucket))]
    async fn fetch_and_parse(
        &self,
        url: &Url,
        bucket: &TimeBucket,
        whitelist: &Whitelist,
        cancel: &CancellationToken,
    ) -> ReleaseResult<Vec<ReleaseEvent>> {
        let html = self.fetch_with_retry(url.as_str(), cancel).await?;

        let parser = Arc::clone(&self.page_parser);
        let target = bucket.clone();
        let members = whitelist.clone();
        let records = tokio::task::spawn_blocking(move || parser.parse_page(&html, &target, &members))
            .await
            .map_err(|e| ReleaseError::fetch_failed(url.as_str(), format!("parser task failed: {e}")))?;

        debug!("{} records from {}", records.len(), url);
        Ok(records)
    }
}
