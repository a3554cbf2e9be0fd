// src/ingest/cursor.rs
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::ingest::types::{Exchange, RawAnnouncement};

/// How the pipeline decides whether it is in its backfill phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstRunMode {
    /// First run until the marker file exists; survives restarts.
    #[default]
    Marker,
    /// Marker stores a date; the first start of each calendar day backfills.
    Daily,
    /// Every process start backfills.
    EveryStart,
}

impl std::str::FromStr for FirstRunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "marker" | "persistent" => Ok(FirstRunMode::Marker),
            "daily" | "per-day" => Ok(FirstRunMode::Daily),
            "every-start" | "every_start" | "always" => Ok(FirstRunMode::EveryStart),
            other => anyhow::bail!("unknown first-run mode: {other}"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkerFile {
    completed_on: NaiveDate,
}

/// Per-exchange "last seen" snapshot and first-run marker under a state directory.
#[derive(Debug, Clone)]
pub struct CursorStore {
    dir: PathBuf,
    exchange: Exchange,
    mode: FirstRunMode,
}

impl CursorStore {
    pub fn new(dir: impl Into<PathBuf>, exchange: Exchange, mode: FirstRunMode) -> Self {
        Self {
            dir: dir.into(),
            exchange,
            mode,
        }
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_latest_announcement.json", self.exchange.slug()))
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_first_run_complete", self.exchange.slug()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Last processed newest item; missing or unreadable state reads as `None`.
    pub async fn load_latest(&self) -> Option<RawAnnouncement> {
        let path = self.latest_path();
        match fs::read_to_string(&path).await {
            Ok(s) => match serde_json::from_str(&s) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cursor file corrupt, ignoring");
                    None
                }
            },
            Err(_) => None,
        }
    }

    pub async fn save_latest(&self, raw: &RawAnnouncement) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.latest_path();
        let body = serde_json::to_vec_pretty(raw)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    /// Whether the backfill phase still has to run, per the configured mode.
    pub async fn is_first_run(&self) -> bool {
        match self.mode {
            FirstRunMode::EveryStart => true,
            FirstRunMode::Marker => fs::metadata(self.marker_path()).await.is_err(),
            FirstRunMode::Daily => {
                let today = Utc::now().with_timezone(&crate::ingest::timestamp::ist()).date_naive();
                match fs::read_to_string(self.marker_path()).await {
                    Ok(s) => serde_json::from_str::<MarkerFile>(&s)
                        .map(|m| m.completed_on != today)
                        .unwrap_or(true),
                    Err(_) => true,
                }
            }
        }
    }

    pub async fn mark_first_run_complete(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let today = Utc::now().with_timezone(&crate::ingest::timestamp::ist()).date_naive();
        let body = serde_json::to_vec(&MarkerFile { completed_on: today })?;
        fs::write(self.marker_path(), body)
            .await
            .with_context(|| format!("writing {}", self.marker_path().display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_roundtrip_and_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let cur = CursorStore::new(tmp.path(), Exchange::Bse, FirstRunMode::Marker);
        assert!(cur.load_latest().await.is_none());
        assert!(cur.is_first_run().await);

        let mut raw = RawAnnouncement::new(Exchange::Bse, "Board Meeting Outcome");
        raw.security_id = Some("500325".into());
        cur.save_latest(&raw).await.unwrap();
        assert_eq!(cur.load_latest().await, Some(raw));

        cur.mark_first_run_complete().await.unwrap();
        assert!(!cur.is_first_run().await);
    }

    #[tokio::test]
    async fn every_start_ignores_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let cur = CursorStore::new(tmp.path(), Exchange::Nse, FirstRunMode::EveryStart);
        cur.mark_first_run_complete().await.unwrap();
        assert!(cur.is_first_run().await);
    }

    #[tokio::test]
    async fn daily_marker_from_another_day_means_first_run() {
        let tmp = tempfile::tempdir().unwrap();
        let cur = CursorStore::new(tmp.path(), Exchange::Nse, FirstRunMode::Daily);
        std::fs::write(cur.marker_path(), r#"{"completed_on":"2001-01-01"}"#).unwrap();
        assert!(cur.is_first_run().await);
        cur.mark_first_run_complete().await.unwrap();
        assert!(!cur.is_first_run().await);
    }

    #[tokio::test]
    async fn corrupt_cursor_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let cur = CursorStore::new(tmp.path(), Exchange::Bse, FirstRunMode::Marker);
        std::fs::write(cur.latest_path(), "{not json").unwrap();
        assert!(cur.load_latest().await.is_none());
    }
}
