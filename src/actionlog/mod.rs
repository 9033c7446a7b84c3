//! Append-only action log backing entry idempotency
//!
//! One record per line, '|'-delimited: action kind, asset code, window
//! timestamp, provenance source, ISO-8601 timestamp. On startup the log is
//! replayed to rebuild the dedupe set `ASSET:window:action`; an action
//! already recorded for a window is never repeated, across restarts or
//! overlapping ticks. The storage medium sits behind a sink trait so the
//! core stays storage-agnostic.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::{ActionLogEntry, Asset};

/// Action kind recorded when a trade entry is made for a window
pub const ACTION_ENTRY: &str = "ENTRY";

/// Durable medium for the action log
#[async_trait]
pub trait ActionLogSink: Send + Sync {
    async fn append(&self, entry: &ActionLogEntry) -> Result<()>;
    async fn replay(&self) -> Result<Vec<ActionLogEntry>>;
}

/// File-backed sink writing '|'-delimited lines
pub struct FileActionLogSink {
    path: PathBuf,
}

impl FileActionLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ActionLogSink for FileActionLogSink {
    async fn append(&self, entry: &ActionLogEntry) -> Result<()> {
        self.ensure_parent()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening action log {}", self.path.display()))?;
        let mut writer = WriterBuilder::new()
            .delimiter(b'|')
            .has_headers(false)
            .from_writer(file);
        let record = [
            entry.action.clone(),
            entry.asset.to_string(),
            entry.window_ts.to_string(),
            entry.source.clone(),
            entry.timestamp.to_rfc3339(),
        ];
        writer
            .write_record(&record)
            .context("writing action record")?;
        writer.flush().context("flushing action log")?;
        Ok(())
    }

    async fn replay(&self) -> Result<Vec<ActionLogEntry>> {
        if !Path::new(&self.path).exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("opening action log {}", self.path.display()))?;
        let mut reader = ReaderBuilder::new()
            .delimiter(b'|')
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, "skipping malformed action log line");
                    continue;
                }
            };
            let Some(entry) = parse_record(
                record.get(0),
                record.get(1),
                record.get(2),
                record.get(3),
                record.get(4),
            ) else {
                warn!(line = ?record.position().map(|p| p.line()), "skipping unparseable action log line");
                continue;
            };
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn parse_record(
    action: Option<&str>,
    asset: Option<&str>,
    window_ts: Option<&str>,
    source: Option<&str>,
    timestamp: Option<&str>,
) -> Option<ActionLogEntry> {
    let action = action?.to_string();
    let asset = Asset::parse(asset?)?;
    let window_ts = window_ts?.parse::<i64>().ok()?;
    let source = source.unwrap_or_default().to_string();
    let timestamp = timestamp
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    Some(ActionLogEntry {
        action,
        asset,
        window_ts,
        source,
        timestamp,
    })
}

/// Dedupe set over the append-only log.
///
/// The set is the only state consulted on the hot path; the sink is the
/// durable record that rebuilds it after a restart.
pub struct ActionLog {
    sink: Box<dyn ActionLogSink>,
    seen: HashSet<String>,
}

impl ActionLog {
    /// Build the log, replaying the sink to rebuild the dedupe set
    pub async fn load(sink: Box<dyn ActionLogSink>) -> Result<Self> {
        let entries = sink.replay().await?;
        let seen: HashSet<String> = entries.iter().map(ActionLogEntry::dedupe_key).collect();
        if !seen.is_empty() {
            info!(actions = seen.len(), "action log replayed");
        }
        Ok(Self { sink, seen })
    }

    pub fn contains(&self, asset: Asset, window_ts: i64, action: &str) -> bool {
        self.seen
            .contains(&format!("{asset}:{window_ts}:{action}"))
    }

    /// Append the action to the sink and the in-memory set.
    ///
    /// The set is updated even if the sink write fails: within this
    /// process the action did happen, and repeating it would be worse
    /// than losing one line of durability.
    pub async fn record(
        &mut self,
        action: &str,
        asset: Asset,
        window_ts: i64,
        source: &str,
    ) -> Result<()> {
        let entry = ActionLogEntry {
            action: action.to_string(),
            asset,
            window_ts,
            source: source.to_string(),
            timestamp: Utc::now(),
        };
        self.seen.insert(entry.dedupe_key());
        self.sink.append(&entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_path() -> PathBuf {
        std::env::temp_dir().join(format!("polysniper-actions-{}.log", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_round_trip_rebuilds_dedupe_set() {
        let path = temp_log_path();
        let sink = FileActionLogSink::new(&path);

        let mut log = ActionLog::load(Box::new(sink)).await.unwrap();
        assert!(!log.contains(Asset::BTC, 1_700_000_100, ACTION_ENTRY));

        log.record(ACTION_ENTRY, Asset::BTC, 1_700_000_100, "ENGINE")
            .await
            .unwrap();
        assert!(log.contains(Asset::BTC, 1_700_000_100, ACTION_ENTRY));

        // Fresh load from the same file must reproduce the key
        let reloaded = ActionLog::load(Box::new(FileActionLogSink::new(&path)))
            .await
            .unwrap();
        assert!(reloaded.contains(Asset::BTC, 1_700_000_100, ACTION_ENTRY));
        assert!(!reloaded.contains(Asset::ETH, 1_700_000_100, ACTION_ENTRY));
        assert!(!reloaded.contains(Asset::BTC, 1_700_001_000, ACTION_ENTRY));

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_line_format_is_pipe_delimited() {
        let path = temp_log_path();
        let mut log = ActionLog::load(Box::new(FileActionLogSink::new(&path)))
            .await
            .unwrap();
        log.record(ACTION_ENTRY, Asset::SOL, 1_700_000_100, "MANUAL")
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let line = contents.lines().next().unwrap();
        let fields: Vec<&str> = line.split('|').collect();
        assert_eq!(fields[0], "ENTRY");
        assert_eq!(fields[1], "SOL");
        assert_eq!(fields[2], "1700000100");
        assert_eq!(fields[3], "MANUAL");
        assert!(fields[4].starts_with("20"));

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_replay_skips_malformed_lines() {
        let path = temp_log_path();
        std::fs::write(
            &path,
            "ENTRY|BTC|1700000100|ENGINE|2023-11-14T22:15:00+00:00\nnot-a-record\nENTRY|XXX|123|ENGINE|2023-11-14T22:15:00+00:00\n",
        )
        .unwrap();

        let log = ActionLog::load(Box::new(FileActionLogSink::new(&path)))
            .await
            .unwrap();
        assert!(log.contains(Asset::BTC, 1_700_000_100, ACTION_ENTRY));

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_missing_file_replays_empty() {
        let log = ActionLog::load(Box::new(FileActionLogSink::new(temp_log_path())))
            .await
            .unwrap();
        assert!(!log.contains(Asset::BTC, 0, ACTION_ENTRY));
    }
}
