//! HTTP access to the schedule site
//!
//! [`PageSource`] is the seam the fetcher depends on; [`HttpClient`] is the
//! reqwest-backed implementation. Every wait is raced against a
//! cancellation token so an abandoned refresh stops promptly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{ReleaseError, ReleaseResult};
use crate::infrastructure::config::FetchConfig;

/// Anything that can hand back the body of a page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get_text(&self, url: &str, cancel: &CancellationToken) -> ReleaseResult<String>;
}

/// HTTP client configuration for crawling
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub follow_redirects: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for HttpClientConfig {
    fn from(fetch: &FetchConfig) -> Self {
        Self {
            user_agent: fetch.user_agent.clone(),
            timeout_seconds: fetch.request_timeout_seconds,
            follow_redirects: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> ReleaseResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| ReleaseError::configuration("fetch.user_agent", e.to_string()))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .map_err(|e| ReleaseError::configuration("fetch", format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn from_fetch_config(fetch: &FetchConfig) -> ReleaseResult<Self> {
        Self::new(HttpClientConfig::from(fetch))
    }

    pub const fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[async_trait]
impl PageSource for HttpClient {
    async fn get_text(&self, url: &str, cancel: &CancellationToken) -> ReleaseResult<String> {
        if cancel.is_cancelled() {
            return Err(ReleaseError::Cancelled);
        }

        info!("Fetching HTML from: {}", url);

        let response = tokio::select! {
            result = self.client.get(url).send() => {
                result.map_err(|e| ReleaseError::fetch_failed(url, e))?
            },
            () = cancel.cancelled() => {
                warn!("HTTP request cancelled for URL: {}", url);
                return Err(ReleaseError::Cancelled);
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ReleaseError::http_status(url, status.as_u16()));
        }

        let text = tokio::select! {
            result = response.text() => {
                result.map_err(|e| ReleaseError::fetch_failed(url, format!("failed to read body: {e}")))?
            },
            () = cancel.cancelled() => {
                warn!("Response reading cancelled for URL: {}", url);
                return Err(ReleaseError::Cancelled);
            }
        };

        debug!("Successfully fetched: {} ({} chars)", url, text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_from_defaults() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        assert_eq!(client.config().timeout_seconds, 30);
        assert!(client.config().follow_redirects);
    }

    #[test]
    fn invalid_user_agent_is_a_configuration_error() {
        let config = HttpClientConfig {
            user_agent: "bad\nagent".to_string(),
            ..HttpClientConfig::default()
        };
        let err = HttpClient::new(config).unwrap_err();
        assert!(matches!(err, ReleaseError::Configuration { .. }));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.get_text("https://example.invalid/", &cancel).await.unwrap_err();
        assert_eq!(err, ReleaseError::Cancelled);
    }
}
