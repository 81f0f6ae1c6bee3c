//! Domain module - release records, buckets and the whitelist seam
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod bucket;
pub mod errors;
pub mod release;
pub mod whitelist;

pub use bucket::{CacheBucketKey, MONTH_NAMES, TimeBucket, WhitelistFingerprint};
pub use errors::{ReleaseError, ReleaseResult};
pub use release::{CANONICAL_DATE_FORMAT, ReleaseEvent, format_release};
pub use whitelist::{InMemoryWhitelist, Whitelist, WhitelistProvider, whitelist_of};
