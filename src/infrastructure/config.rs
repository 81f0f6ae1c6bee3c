//! Configuration infrastructure
//!
//! Configuration is layered:
//! 1. Built-in defaults (see [`defaults`])
//! 2. Optional config file (TOML / JSON, picked by extension)
//! 3. Environment variables, e.g. `RADAR_FETCH__MAX_CONCURRENT=4`
//!
//! Everything is validated once at startup; the runtime never re-reads it.

#![allow(clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{ReleaseError, ReleaseResult};
use crate::infrastructure::parsing::config::ScheduleSelectors;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RADAR";

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub source: SourceConfig,
    pub timezone: TimezoneConfig,
    pub logging: LoggingConfig,
}

/// Network behaviour of the page fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum requests in flight per fetcher
    pub max_concurrent: usize,

    /// Attempts per request, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    pub initial_backoff_ms: u64,

    /// Growth factor applied to the delay after every failed attempt
    pub backoff_multiplier: f64,

    /// Upper bound for a single backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Politeness delay window in milliseconds (uniformly sampled)
    pub politeness_delay_min_ms: u64,
    pub politeness_delay_max_ms: u64,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    pub user_agent: String,
}

/// TTLs, debounce and deadlines for the cache and updater
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for previous/current/next month buckets
    pub active_ttl_seconds: u64,

    /// TTL for every other bucket
    pub inactive_ttl_seconds: u64,

    /// Quiet period that coalesces refresh triggers
    pub debounce_seconds: u64,

    /// Age after which a pending mark is considered abandoned
    pub pending_stale_seconds: u64,

    /// Hard ceiling for a whole refresh run
    pub refresh_deadline_seconds: u64,

    /// Ceiling for one bucket inside a refresh run
    pub bucket_deadline_seconds: u64,

    /// Ceiling for fetching and parsing one link
    pub link_deadline_seconds: u64,
}

/// Where the schedule lives and how its markup is read
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Page listing the per-month schedule links
    pub listing_url: String,

    /// Substring every schedule link carries
    pub link_keyword: String,

    /// Year used for buckets and dates that do not name one (None = current year)
    pub fallback_year: Option<i32>,

    pub selectors: ScheduleSelectors,
}

/// Offset between KST and the local business time zone
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimezoneConfig {
    /// Minutes added to a KST wall-clock time; negative moves west
    pub local_offset_minutes: i32,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Log directory; defaults to `logs/` next to the executable
    pub directory: Option<PathBuf>,

    pub file_name: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MAX_CONCURRENT_REQUESTS,
            max_attempts: defaults::MAX_ATTEMPTS,
            initial_backoff_ms: defaults::INITIAL_BACKOFF_MS,
            backoff_multiplier: defaults::BACKOFF_MULTIPLIER,
            max_backoff_ms: defaults::MAX_BACKOFF_MS,
            politeness_delay_min_ms: defaults::POLITENESS_DELAY_MIN_MS,
            politeness_delay_max_ms: defaults::POLITENESS_DELAY_MAX_MS,
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            active_ttl_seconds: defaults::ACTIVE_TTL_SECONDS,
            inactive_ttl_seconds: defaults::INACTIVE_TTL_SECONDS,
            debounce_seconds: defaults::DEBOUNCE_SECONDS,
            pending_stale_seconds: defaults::PENDING_STALE_SECONDS,
            refresh_deadline_seconds: defaults::REFRESH_DEADLINE_SECONDS,
            bucket_deadline_seconds: defaults::BUCKET_DEADLINE_SECONDS,
            link_deadline_seconds: defaults::LINK_DEADLINE_SECONDS,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            listing_url: defaults::LISTING_URL.to_string(),
            link_keyword: defaults::LINK_KEYWORD.to_string(),
            fallback_year: None,
            selectors: ScheduleSelectors::default(),
        }
    }
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            local_offset_minutes: defaults::LOCAL_OFFSET_MINUTES,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            directory: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
        }
    }
}

impl FetchConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl CacheConfig {
    pub const fn active_ttl(&self) -> Duration {
        Duration::from_secs(self.active_ttl_seconds)
    }

    pub const fn inactive_ttl(&self) -> Duration {
        Duration::from_secs(self.inactive_ttl_seconds)
    }

    pub const fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_seconds)
    }

    pub const fn pending_stale_after(&self) -> Duration {
        Duration::from_secs(self.pending_stale_seconds)
    }

    pub const fn refresh_deadline(&self) -> Duration {
        Duration::from_secs(self.refresh_deadline_seconds)
    }

    pub const fn bucket_deadline(&self) -> Duration {
        Duration::from_secs(self.bucket_deadline_seconds)
    }

    pub const fn link_deadline(&self) -> Duration {
        Duration::from_secs(self.link_deadline_seconds)
    }
}

impl TimezoneConfig {
    /// Offset as a chrono value (validated to lie within a day).
    pub fn offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.local_offset_minutes.checked_mul(60)?)
    }
}

impl AppConfig {
    /// Reject combinations the pipeline cannot run with.
    pub fn validate(&self) -> ReleaseResult<()> {
        let fetch = &self.fetch;
        if fetch.max_concurrent == 0 {
            return Err(ReleaseError::configuration("fetch.max_concurrent", "must be at least 1"));
        }
        if fetch.max_attempts == 0 {
            return Err(ReleaseError::configuration("fetch.max_attempts", "must be at least 1"));
        }
        if fetch.backoff_multiplier.is_nan() || fetch.backoff_multiplier < 1.0 {
            return Err(ReleaseError::configuration(
                "fetch.backoff_multiplier",
                "must be a number >= 1.0",
            ));
        }
        if fetch.initial_backoff_ms > fetch.max_backoff_ms {
            return Err(ReleaseError::configuration(
                "fetch.initial_backoff_ms",
                "must not exceed fetch.max_backoff_ms",
            ));
        }
        if fetch.politeness_delay_min_ms > fetch.politeness_delay_max_ms {
            return Err(ReleaseError::configuration(
                "fetch.politeness_delay_min_ms",
                "must not exceed fetch.politeness_delay_max_ms",
            ));
        }
        if fetch.request_timeout_seconds == 0 {
            return Err(ReleaseError::configuration(
                "fetch.request_timeout_seconds",
                "must be at least 1",
            ));
        }

        let cache = &self.cache;
        if cache.active_ttl_seconds == 0 || cache.active_ttl_seconds > cache.inactive_ttl_seconds {
            return Err(ReleaseError::configuration(
                "cache.active_ttl_seconds",
                "must be positive and not exceed cache.inactive_ttl_seconds",
            ));
        }
        if cache.debounce_seconds == 0 {
            return Err(ReleaseError::configuration("cache.debounce_seconds", "must be at least 1"));
        }
        if cache.link_deadline_seconds == 0
            || cache.link_deadline_seconds > cache.bucket_deadline_seconds
            || cache.bucket_deadline_seconds > cache.refresh_deadline_seconds
        {
            return Err(ReleaseError::configuration(
                "cache.link_deadline_seconds",
                "deadlines must satisfy 0 < link <= bucket <= refresh",
            ));
        }

        if self.timezone.offset().is_none() || self.timezone.local_offset_minutes.abs() >= 24 * 60 {
            return Err(ReleaseError::configuration(
                "timezone.local_offset_minutes",
                "must lie strictly within one day",
            ));
        }

        if url::Url::parse(&self.source.listing_url).is_err() {
            return Err(ReleaseError::configuration(
                "source.listing_url",
                format!("'{}' is not an absolute URL", self.source.listing_url),
            ));
        }
        self.source.selectors.compile()?;

        Ok(())
    }
}

/// Get the application configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Failed to get user config directory")?
        .join("comeback-radar");
    Ok(config_dir)
}

/// Load defaults, then the optional file, then `RADAR_*` environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let defaults = config::Config::try_from(&AppConfig::default())
        .context("Failed to serialize default configuration")?;

    let mut builder = config::Config::builder().add_source(defaults);

    let file = path.map(Path::to_path_buf).or_else(|| {
        get_config_dir()
            .ok()
            .map(|dir| dir.join("config.toml"))
            .filter(|p| p.exists())
    });
    if let Some(file) = &file {
        info!("Loading configuration from: {:?}", file);
        builder = builder.add_source(config::File::from(file.as_path()).required(path.is_some()));
    }

    let config: AppConfig = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to assemble configuration sources")?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Default configuration values
pub mod defaults {
    /// Default maximum concurrent requests
    pub const MAX_CONCURRENT_REQUESTS: usize = 5;

    /// Default attempts per request (first try included)
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Default first retry delay in milliseconds
    pub const INITIAL_BACKOFF_MS: u64 = 1000;

    /// Default backoff growth factor
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;

    /// Default backoff cap in milliseconds
    pub const MAX_BACKOFF_MS: u64 = 30_000;

    /// Default politeness delay window in milliseconds
    pub const POLITENESS_DELAY_MIN_MS: u64 = 200;
    pub const POLITENESS_DELAY_MAX_MS: u64 = 800;

    /// Default request timeout in seconds
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

    /// Default TTL for active buckets (30 minutes)
    pub const ACTIVE_TTL_SECONDS: u64 = 30 * 60;

    /// Default TTL for distant buckets (6 hours)
    pub const INACTIVE_TTL_SECONDS: u64 = 6 * 60 * 60;

    /// Default debounce window
    pub const DEBOUNCE_SECONDS: u64 = 60;

    /// Pending marks older than this are treated as abandoned
    pub const PENDING_STALE_SECONDS: u64 = 5 * 60;

    /// Deadlines for a refresh run, one bucket and one link
    pub const REFRESH_DEADLINE_SECONDS: u64 = 20 * 60;
    pub const BUCKET_DEADLINE_SECONDS: u64 = 5 * 60;
    pub const LINK_DEADLINE_SECONDS: u64 = 2 * 60;

    pub const LISTING_URL: &str = "https://kpopofficial.com/category/kpop-comeback-schedule/";
    pub const LINK_KEYWORD: &str = "comeback-schedule";

    /// KST (UTC+9) to UTC+3
    pub const LOCAL_OFFSET_MINUTES: i32 = -6 * 60;

    // Log configuration defaults
    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = false;
    pub const LOG_FILE_NAME: &str = "comeback-radar.log";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.debounce(), Duration::from_secs(60));
        assert_eq!(config.timezone.offset(), FixedOffset::east_opt(-6 * 3600));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.fetch.max_concurrent = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ReleaseError::Configuration { ref field, .. } if field == "fetch.max_concurrent"));
    }

    #[test]
    fn rejects_inverted_ttls() {
        let mut config = AppConfig::default();
        config.cache.active_ttl_seconds = config.cache.inactive_ttl_seconds + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let mut config = AppConfig::default();
        config.fetch.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        config.fetch.backoff_multiplier = f64::NAN;
        assert!(config.validate().is_err());

        config.fetch.backoff_multiplier = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radar.toml");
        std::fs::write(
            &path,
            "[fetch]\nmax_concurrent = 2\n\n[cache]\ndebounce_seconds = 5\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.fetch.max_concurrent, 2);
        assert_eq!(config.cache.debounce_seconds, 5);
        assert_eq!(config.fetch.max_attempts, defaults::MAX_ATTEMPTS);
    }
}
