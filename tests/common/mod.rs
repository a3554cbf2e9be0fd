// tests/common/mod.rs
//
// Shared doubles for pipeline-level tests: a scripted exchange adapter, a broadcaster
// that records publications, and a builder wiring them into a Pipeline.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use filings_pipeline::broadcast::{Broadcaster, Topic};
use filings_pipeline::classify::rate_limit::RateLimiter;
use filings_pipeline::classify::DocumentClassifier;
use filings_pipeline::ingest::cursor::FirstRunMode;
use filings_pipeline::ingest::dedup::DedupConfig;
use filings_pipeline::ingest::error::FetchError;
use filings_pipeline::ingest::retry::RetryPolicy;
use filings_pipeline::ingest::timestamp::ist;
use filings_pipeline::ingest::types::{
    DateRange, Exchange, FilingRecord, PartialAnnouncement, RawAnnouncement, SourceAdapter,
};
use filings_pipeline::pipeline::{Pipeline, PipelineDeps, PipelineSettings};
use filings_pipeline::store::MemoryStore;

pub const RELIANCE_ISIN: &str = "INE002A01018";

pub const FINANCIAL_RESULTS_REPLY: &str = "**Category:** Financial Results\n**Headline:** Q1 results\n## Structured Narrative\nRevenue up 12% year on year.";

/// Scripted exchange: serves whatever batch the test sets and resolves ISINs from a map.
#[derive(Default)]
pub struct MockSource {
    batch: Mutex<Vec<RawAnnouncement>>,
    isins: Mutex<HashMap<String, String>>,
    fail_downloads: AtomicBool,
    fail_fetch: AtomicBool,
    flaky_downloads: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub resolve_calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_batch(&self, batch: Vec<RawAnnouncement>) {
        *self.batch.lock().unwrap() = batch;
    }

    pub fn map_isin(&self, security: &str, isin: &str) {
        self.isins.lock().unwrap().insert(security.into(), isin.into());
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    /// The next `n` downloads fail with a retryable 503.
    pub fn flaky_downloads(&self, n: usize) {
        self.flaky_downloads.store(n, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn exchange(&self) -> Exchange {
        Exchange::Bse
    }

    async fn fetch_batch(&self, _range: &DateRange) -> Result<Vec<RawAnnouncement>, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FetchError::Status(503));
        }
        Ok(self.batch.lock().unwrap().clone())
    }

    async fn resolve_identity(
        &self,
        raw: &RawAnnouncement,
    ) -> Result<PartialAnnouncement, FetchError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let key = raw.security_id.clone().or_else(|| raw.symbol.clone()).unwrap_or_default();
        let isin = raw
            .isin
            .clone()
            .or_else(|| self.isins.lock().unwrap().get(&key).cloned());
        Ok(PartialAnnouncement {
            isin,
            security_id: raw.security_id.clone(),
            symbol: raw.symbol.clone(),
            company_name: raw.company_name.clone(),
        })
    }

    async fn fetch_attachment(&self, reference: &str, dir: &Path) -> Result<PathBuf, FetchError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(FetchError::Status(404));
        }
        let flaky = self
            .flaky_downloads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if flaky.is_ok() {
            return Err(FetchError::Status(503));
        }
        let path = dir.join(reference);
        tokio::fs::write(&path, b"%PDF-1.4\n% test document\n").await?;
        Ok(path)
    }

    fn file_url(&self, reference: &str) -> String {
        format!("https://files.test/AttachLive/{reference}")
    }
}

/// Records `(topic, corp_id)` for every publication.
#[derive(Default)]
pub struct RecordingBroadcaster {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingBroadcaster {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.sent().into_iter().map(|(t, _)| t).collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn publish(&self, topic: &Topic, record: &FilingRecord) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), record.corp_id.clone()));
        Ok(())
    }
}

/// Naive IST timestamp `minutes_ago` before now, in the BSE feed layout.
pub fn ist_minutes_ago(minutes_ago: i64) -> String {
    (Utc::now() - chrono::Duration::minutes(minutes_ago))
        .with_timezone(&ist())
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string()
}

pub fn bse_raw(id: &str, scrip: &str, headline: &str, attachment: Option<&str>, minutes_ago: i64) -> RawAnnouncement {
    let mut raw = RawAnnouncement::new(Exchange::Bse, headline);
    raw.upstream_id = Some(id.into());
    raw.security_id = Some(scrip.into());
    raw.symbol = Some("RELIANCE".into());
    raw.company_name = Some("Reliance Industries".into());
    raw.attachment = attachment.map(str::to_string);
    raw.submitted_at_raw = Some(ist_minutes_ago(minutes_ago));
    raw
}

pub fn test_settings(state_dir: &Path) -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        },
        state_dir: state_dir.to_path_buf(),
        first_run_mode: FirstRunMode::Marker,
        backfill_item_delay: Duration::ZERO,
        classify_timeout: Duration::from_secs(5),
        dedup: DedupConfig::in_memory(100),
        ..PipelineSettings::default()
    }
}

pub struct Harness {
    pub source: Arc<MockSource>,
    pub classifier: Arc<dyn DocumentClassifier>,
    pub store: Arc<MemoryStore>,
    pub broadcaster: Arc<RecordingBroadcaster>,
}

impl Harness {
    pub fn new(classifier: Arc<dyn DocumentClassifier>) -> Self {
        Self {
            source: Arc::new(MockSource::new()),
            classifier,
            store: Arc::new(MemoryStore::new()),
            broadcaster: Arc::new(RecordingBroadcaster::default()),
        }
    }

    pub fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            source: self.source.clone(),
            classifier: self.classifier.clone(),
            limiter: Arc::new(RateLimiter::per_minute(1_000)),
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
        }
    }

    pub async fn pipeline(&self, settings: PipelineSettings) -> Pipeline {
        Pipeline::new(self.deps(), settings).await.expect("pipeline")
    }

    /// A pipeline already past its first run (backfilled an empty feed).
    pub async fn steady_pipeline(&self, settings: PipelineSettings) -> Pipeline {
        let mut p = self.pipeline(settings).await;
        if p.is_first_run() {
            let saved = self.source.batch.lock().unwrap().clone();
            self.source.set_batch(Vec::new());
            p.backfill().await.expect("empty backfill");
            self.source.set_batch(saved);
        }
        assert!(!p.is_first_run());
        p
    }
}
