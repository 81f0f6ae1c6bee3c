//! # Crawling
//!
//! Network side of the pipeline: the page fetcher and the updater that turns
//! fetched pages into cache entries.

pub mod fetcher;
pub mod updater;

pub use fetcher::{Fetcher, PageFetcher, PolitenessDelay};
pub use updater::{BucketOutcome, RefreshReport, Refresher, Updater, UpdaterDeadlines, merge_batches};
