//! Error taxonomy for the crawl-parse-cache pipeline
//!
//! Parsing-level failures are recovered locally by skipping the offending row
//! or event. Network-level failures are retried and then surfaced per bucket.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReleaseError {
    #[error("Invalid date format: '{input}'")]
    InvalidDateFormat { input: String },

    #[error("Fetch failed for {url}: {cause}")]
    FetchFailed {
        url: String,
        cause: String,
        /// HTTP status of the last attempt, when the server answered at all
        status: Option<u16>,
    },

    #[error("Whitelist is empty")]
    EmptyWhitelist,

    #[error("Parsing {url} exceeded its deadline")]
    ParseTimeout { url: String },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Configuration error in '{field}': {message}")]
    Configuration { field: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl ReleaseError {
    pub fn invalid_date(input: &str) -> Self {
        Self::InvalidDateFormat {
            input: input.to_string(),
        }
    }

    pub fn fetch_failed(url: &str, cause: impl std::fmt::Display) -> Self {
        Self::FetchFailed {
            url: url.to_string(),
            cause: cause.to_string(),
            status: None,
        }
    }

    pub fn http_status(url: &str, status: u16) -> Self {
        Self::FetchFailed {
            url: url.to_string(),
            cause: format!("HTTP status {status}"),
            status: Some(status),
        }
    }

    pub fn configuration(field: &str, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Whether another attempt of the same request can succeed.
    ///
    /// Client errors other than 408/429 are permanent, everything network
    /// shaped is worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::FetchFailed { status: Some(code), .. } => {
                *code >= 500 || *code == 408 || *code == 429
            }
            Self::FetchFailed { status: None, .. } | Self::ParseTimeout { .. } => true,
            Self::InvalidDateFormat { .. }
            | Self::EmptyWhitelist
            | Self::Cancelled
            | Self::InvalidSelector { .. }
            | Self::Configuration { .. }
            | Self::Persistence(_) => false,
        }
    }

    /// Failures that make a whole link count as "no fresh data".
    pub fn is_fetch_level(&self) -> bool {
        matches!(self, Self::FetchFailed { .. } | Self::ParseTimeout { .. })
    }
}

pub type ReleaseResult<T> = Result<T, ReleaseError>;
