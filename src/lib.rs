//! Comeback Radar - release schedule crawler and cache
//!
//! Crawls a public comeback schedule, keeps the releases of whitelisted
//! artists, and serves them from a per-month cache refreshed in the
//! background.

pub mod cache;
pub mod crawling;
pub mod domain;
pub mod infrastructure;

pub use cache::{CacheStats, FormattedQuery, QueryResult, ScheduleCache};
pub use crawling::{BucketOutcome, Fetcher, PageFetcher, RefreshReport, Refresher, Updater};
pub use domain::{ReleaseError, ReleaseEvent, ReleaseResult, TimeBucket, WhitelistProvider, format_release};
