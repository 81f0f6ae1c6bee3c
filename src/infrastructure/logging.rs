//! Logging system configuration and initialization
//!
//! - Console and file output, each optional
//! - Structured JSON file logs (optional)
//! - Log level from configuration, overridable with `RUST_LOG`
//! - Timestamps in KST (UTC+9), the timezone of the schedule source
//! - The previous log file is renamed with its timestamp on startup

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{FixedOffset, Offset, Utc};
use lazy_static::lazy_static;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

const KST_OFFSET_SECONDS: i32 = 9 * 3600;

/// Dependency targets that stay quiet unless TRACE is requested
const QUIET_TARGETS: [(&str, &str); 6] = [
    ("reqwest", "info"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("h2", "warn"),
    ("html5ever", "warn"),
    ("tokio", "info"),
];

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECONDS).unwrap_or_else(|| Utc.fix())
}

/// Custom time formatter for KST (Korea Standard Time, UTC+9)
struct KstTimeFormatter;

impl FormatTime for KstTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let kst_time = Utc::now().with_timezone(&kst());
        write!(w, "{}", kst_time.format("%Y-%m-%d %H:%M:%S%.3f %Z"))
    }
}

/// Log directory next to the executable
pub fn get_log_directory() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Rename an existing log file to `<stem>.<KST timestamp>.log`.
fn rotate_existing_log_file(log_dir: &Path, log_file_name: &str) -> Result<Option<PathBuf>> {
    let log_file_path = log_dir.join(log_file_name);
    if !log_file_path.exists() {
        return Ok(None);
    }

    let metadata = std::fs::metadata(&log_file_path).context("Failed to get log file metadata")?;
    let file_time = metadata
        .modified()
        .or_else(|_| metadata.created())
        .unwrap_or_else(|_| std::time::SystemTime::now());
    let datetime: chrono::DateTime<Utc> = file_time.into();
    let kst_datetime = datetime.with_timezone(&kst());

    let file_stem = log_file_name.trim_end_matches(".log");
    let timestamped_name = format!("{}.{}.log", file_stem, kst_datetime.format("%Y%m%dT%H%M%S"));
    let timestamped_path = log_dir.join(&timestamped_name);

    std::fs::rename(&log_file_path, &timestamped_path).with_context(|| {
        format!(
            "Failed to rotate log file {} to {}",
            log_file_path.display(),
            timestamped_path.display()
        )
    })?;
    Ok(Some(timestamped_path))
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured level with
/// noisy dependencies held back.
fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(&config.level);
        if !config.level.to_lowercase().contains("trace") {
            for (target, level) in QUIET_TARGETS {
                if let Ok(directive) = format!("{target}={level}").parse() {
                    filter = filter.add_directive(directive);
                }
            }
            if let Ok(directive) = format!("comeback_radar_lib={}", config.level).parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    })
}

/// Initialize logging with custom configuration
///
/// Fails when neither console nor file output is enabled, or when a global
/// subscriber is already installed.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    if !config.file_output && !config.console_output {
        return Err(anyhow!("No logging output configured"));
    }

    let log_dir = config.directory.clone().unwrap_or_else(get_log_directory);
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut rotated = None;

    if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
        rotated = rotate_existing_log_file(&log_dir, &config.file_name)?;

        let file_appender = rolling::never(&log_dir, &config.file_name);
        let (writer, guard) = non_blocking(file_appender);
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(guard);

        let file_layer = if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(writer)
                .with_timer(KstTimeFormatter)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .boxed()
        } else {
            // Minimal file format: time, level, message
            fmt::Layer::new()
                .with_writer(writer)
                .with_timer(KstTimeFormatter)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false)
                .boxed()
        };
        layers.push(file_layer);
    }

    if config.console_output {
        layers.push(
            fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_timer(KstTimeFormatter)
                .with_target(false)
                .boxed(),
        );
    }

    Registry::default()
        .with(layers)
        .with(build_env_filter(config))
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    if config.file_output {
        info!("Log file: {}", log_dir.join(&config.file_name).display());
        if let Some(path) = rotated {
            info!("Rotated previous log file to: {}", path.display());
        }
    }
    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Comeback Radar ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {}", current_dir.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(!config.level.is_empty());
        assert!(config.console_output);
        assert!(!config.file_output);
    }

    #[test]
    fn test_log_directory_is_named_logs() {
        assert!(get_log_directory().to_string_lossy().ends_with("logs"));
    }

    #[test]
    fn rotation_renames_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("radar.log"), "old").unwrap();

        let rotated = rotate_existing_log_file(dir.path(), "radar.log").unwrap().unwrap();
        assert!(!dir.path().join("radar.log").exists());
        assert!(rotated.file_name().unwrap().to_string_lossy().starts_with("radar."));
        assert_eq!(std::fs::read_to_string(rotated).unwrap(), "old");
    }

    #[test]
    fn rotation_without_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        assert!(rotate_existing_log_file(dir.path(), "radar.log").unwrap().is_none());
    }

    #[test]
    fn no_output_is_rejected() {
        let config = LoggingConfig {
            console_output: false,
            file_output: false,
            ..LoggingConfig::default()
        };
        assert!(init_logging_with_config(&config).is_err());
    }

    #[test]
    fn file_only_json_output_installs_the_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            console_output: false,
            file_output: true,
            json_format: true,
            directory: Some(dir.path().join("logs")),
            ..LoggingConfig::default()
        };

        init_logging_with_config(&config).unwrap();
        assert!(dir.path().join("logs").is_dir());
        assert!(dir.path().join("logs").join(&config.file_name).exists());
    }
}
