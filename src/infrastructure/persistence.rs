//! Write-behind persistence of refreshed buckets
//!
//! The cache never reads back from a sink; persistence is a side channel and
//! its failures are logged, not propagated into a refresh.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{ReleaseError, ReleaseEvent, ReleaseResult, TimeBucket};

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn persist(&self, bucket: &TimeBucket, events: &[ReleaseEvent]) -> ReleaseResult<()>;
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl PersistenceSink for NoopSink {
    async fn persist(&self, _bucket: &TimeBucket, _events: &[ReleaseEvent]) -> ReleaseResult<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct PersistedEvent<'a> {
    bucket: &'a str,
    persisted_at: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a ReleaseEvent,
}

/// Appends one JSON object per event to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceSink for JsonLinesSink {
    async fn persist(&self, bucket: &TimeBucket, events: &[ReleaseEvent]) -> ReleaseResult<()> {
        let persisted_at = Utc::now();
        let mut buffer = Vec::new();
        for event in events {
            let line = PersistedEvent {
                bucket: bucket.label(),
                persisted_at,
                event,
            };
            serde_json::to_writer(&mut buffer, &line).map_err(|e| ReleaseError::Persistence(e.to_string()))?;
            buffer.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ReleaseError::Persistence(format!("{}: {e}", parent.display())))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ReleaseError::Persistence(format!("{}: {e}", self.path.display())))?;
        file.write_all(&buffer)
            .await
            .map_err(|e| ReleaseError::Persistence(e.to_string()))?;
        file.flush().await.map_err(|e| ReleaseError::Persistence(e.to_string()))?;

        debug!("Persisted {} events for '{}' to {}", events.len(), bucket, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("out").join("events.jsonl"));
        let date = NaiveDate::from_ymd_opt(2024, 5, 27).unwrap();
        let events = vec![
            ReleaseEvent::new("aespa", date).with_collection_title(Some("Armageddon".into())),
            ReleaseEvent::new("IVE", date),
        ];

        let bucket = TimeBucket::new("may-2024");
        sink.persist(&bucket, &events).await.unwrap();
        sink.persist(&bucket, &events[..1]).await.unwrap();

        let written = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<_> = written.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["bucket"], "may-2024");
        assert_eq!(first["entity_name"], "aespa");
        assert_eq!(first["collection_title"], "Armageddon");
    }

    #[tokio::test]
    async fn noop_sink_accepts_everything() {
        assert!(NoopSink.persist(&TimeBucket::new("may"), &[]).await.is_ok());
    }
}
