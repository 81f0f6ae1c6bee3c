//! Infrastructure layer: configuration, logging, HTTP access, retry,
//! persistence and HTML parsing.

pub mod config;
pub mod http_client;
pub mod logging;
pub mod parsing;
pub mod persistence;
pub mod retry;

pub use config::{AppConfig, CacheConfig, FetchConfig, LoggingConfig, SourceConfig, TimezoneConfig, load_config};
pub use http_client::{HttpClient, HttpClientConfig, PageSource};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use persistence::{JsonLinesSink, NoopSink, PersistenceSink};
pub use retry::RetryPolicy;
