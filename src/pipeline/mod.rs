//! Per-exchange ingestion pipeline.
//!
//! One [`Pipeline`] owns everything stateful for its exchange (dedup cache, cursor,
//! scratch directory) and walks each announcement through a linear state machine:
//! keyword filter, optional PDF classification, ISIN resolution, dedup, persistence,
//! broadcast decision. Every step ends in a typed [`Outcome`]; nothing here panics or
//! propagates a per-item error to the polling loop.

pub mod outcome;
pub mod scheduler;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use metrics::{counter, gauge, histogram};

use crate::broadcast::{fan_out, DynBroadcaster};
use crate::classify::rate_limit::RateLimiter;
use crate::classify::{interpret, ClassifyError, DynClassifier};
use crate::ingest::cursor::{CursorStore, FirstRunMode};
use crate::ingest::dedup::{DedupCache, DedupConfig};
use crate::ingest::filter::KeywordPolicy;
use crate::ingest::isin::{is_valid_isin, normalize_isin};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::timestamp::{ist, is_fresh, parse_timestamp};
use crate::ingest::types::{
    Announcement, DateRange, Exchange, Identity, RawAnnouncement, SourceAdapter, DEFAULT_CATEGORY,
};
use crate::store::{DynStore, InsertOutcome};

pub use outcome::{DiscardReason, FailureStage, Outcome, TickReport};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub freshness_window: chrono::Duration,
    pub source_offset: FixedOffset,
    pub state_dir: PathBuf,
    pub first_run_mode: FirstRunMode,
    pub backfill_item_delay: Duration,
    pub classify_timeout: Duration,
    pub keywords: KeywordPolicy,
    pub dedup: DedupConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            freshness_window: chrono::Duration::hours(2),
            source_offset: ist(),
            state_dir: PathBuf::from("data"),
            first_run_mode: FirstRunMode::Marker,
            backfill_item_delay: Duration::from_secs(1),
            classify_timeout: Duration::from_secs(120),
            keywords: KeywordPolicy::default(),
            dedup: DedupConfig::default(),
        }
    }
}

/// Collaborators injected at construction.
#[derive(Clone)]
pub struct PipelineDeps {
    pub source: Arc<dyn SourceAdapter>,
    pub classifier: DynClassifier,
    pub limiter: Arc<RateLimiter>,
    pub store: DynStore,
    pub broadcaster: DynBroadcaster,
}

/// Downloaded attachment, removed when dropped.
struct ScratchFile(PathBuf);

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), error = %e, "scratch file not removed");
            }
        }
    }
}

pub struct Pipeline {
    exchange: Exchange,
    deps: PipelineDeps,
    settings: PipelineSettings,
    cache: DedupCache,
    cursor: CursorStore,
    workdir: tempfile::TempDir,
    first_run: bool,
}

impl Pipeline {
    pub async fn new(deps: PipelineDeps, settings: PipelineSettings) -> Result<Self> {
        let exchange = deps.source.exchange();
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{}-filings-", exchange.slug()))
            .tempdir()
            .context("creating pipeline work directory")?;
        let cache = DedupCache::load(settings.dedup.clone());
        let cursor = CursorStore::new(&settings.state_dir, exchange, settings.first_run_mode);
        let first_run = cursor.is_first_run().await;

        crate::ingest::ensure_metrics_described();
        tracing::info!(
            exchange = %exchange,
            first_run,
            cached = cache.len(),
            workdir = %workdir.path().display(),
            "pipeline ready"
        );
        Ok(Self {
            exchange,
            deps,
            settings,
            cache,
            cursor,
            workdir,
            first_run,
        })
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Today's batch, newest first, or `None` once retries are exhausted.
    async fn try_fetch_batch(&self) -> Option<Vec<RawAnnouncement>> {
        let today = DateRange::today(self.settings.source_offset);
        let range = &today;
        let source = &self.deps.source;
        match self
            .settings
            .retry
            .run("fetch batch", move || source.fetch_batch(range))
            .await
        {
            Ok(batch) => Some(batch),
            Err(e) => {
                counter!("pipeline_fetch_errors_total", "exchange" => self.exchange.slug())
                    .increment(1);
                tracing::error!(exchange = %self.exchange, error = %e, "batch fetch failed");
                None
            }
        }
    }

    /// Today's batch, newest first. Exhausted retries read as an empty feed.
    pub async fn fetch_batch(&self) -> Vec<RawAnnouncement> {
        self.try_fetch_batch().await.unwrap_or_default()
    }

    /// One poll step: backfill on first run, otherwise process the newest item if the
    /// cursor has not seen it.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let report = if self.first_run {
            self.backfill().await?
        } else {
            let batch = self.fetch_batch().await;
            match batch.first() {
                None => TickReport::Empty,
                Some(newest) => {
                    let last = self.cursor.load_latest().await;
                    if last.as_ref().is_some_and(|l| l.same_as(newest)) {
                        TickReport::Unchanged
                    } else {
                        let outcome = self.process(newest).await;
                        self.cursor.save_latest(newest).await?;
                        TickReport::Processed(outcome)
                    }
                }
            }
        };
        gauge!("pipeline_last_tick_ts", "exchange" => self.exchange.slug())
            .set(Utc::now().timestamp() as f64);
        Ok(report)
    }

    /// Process the whole batch with broadcast suppressed, then leave first-run mode.
    /// A feed that could not be fetched leaves the pipeline in first-run mode so the
    /// next tick backfills again.
    pub async fn backfill(&mut self) -> Result<TickReport> {
        let Some(batch) = self.try_fetch_batch().await else {
            tracing::warn!(exchange = %self.exchange, "backfill postponed, feed unavailable");
            return Ok(TickReport::Empty);
        };
        tracing::info!(exchange = %self.exchange, items = batch.len(), "first run backfill");

        let mut persisted = 0usize;
        for (i, raw) in batch.iter().enumerate() {
            if i > 0 && !self.settings.backfill_item_delay.is_zero() {
                tokio::time::sleep(self.settings.backfill_item_delay).await;
            }
            if self.process(raw).await.is_persisted() {
                persisted += 1;
            }
        }

        if let Some(newest) = batch.first() {
            self.cursor.save_latest(newest).await?;
        }
        self.cursor.mark_first_run_complete().await?;
        self.first_run = false;
        if let Err(e) = self.cache.save() {
            tracing::warn!(exchange = %self.exchange, error = ?e, "dedup save after backfill failed");
        }
        tracing::info!(exchange = %self.exchange, fetched = batch.len(), persisted, "backfill complete");
        Ok(TickReport::Backfilled {
            fetched: batch.len(),
            persisted,
        })
    }

    pub async fn process(&mut self, raw: &RawAnnouncement) -> Outcome {
        self.process_at(raw, Utc::now()).await
    }

    /// Walk one announcement through the state machine, with `now` as the freshness
    /// reference.
    pub async fn process_at(&mut self, raw: &RawAnnouncement, now: DateTime<Utc>) -> Outcome {
        let outcome = self.run_stages(raw, now).await;
        counter!(
            "pipeline_items_total",
            "exchange" => self.exchange.slug(),
            "outcome" => outcome.label()
        )
        .increment(1);
        gauge!("dedup_cache_size", "exchange" => self.exchange.slug()).set(self.cache.len() as f64);
        tracing::info!(
            exchange = %self.exchange,
            security = raw.security_id.as_deref().or(raw.symbol.as_deref()).unwrap_or("-"),
            headline = %raw.headline,
            outcome = %outcome,
            "announcement processed"
        );
        outcome
    }

    async fn run_stages(&mut self, raw: &RawAnnouncement, now: DateTime<Utc>) -> Outcome {
        if let Some(m) = self.settings.keywords.rejects(&raw.headline) {
            return Outcome::Discarded(DiscardReason::NegativeKeyword(m.keyword));
        }

        // Identity never depends on classifier output, so duplicates are caught before
        // any download or classifier quota is spent.
        let identity = Identity::for_raw(raw);
        if self.cache.contains(&identity) {
            return Outcome::Discarded(DiscardReason::Duplicate);
        }

        let (category, narrative) = match self.classify(raw).await {
            Ok(c) => c,
            Err(stage) => return Outcome::Failed(stage),
        };

        let source = &self.deps.source;
        let partial = match self
            .settings
            .retry
            .run("resolve identity", move || source.resolve_identity(raw))
            .await
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(exchange = %self.exchange, error = %e, "identity resolution failed");
                return Outcome::Discarded(DiscardReason::UnresolvedIsin);
            }
        };
        let isin = match partial.isin.as_deref().and_then(normalize_isin) {
            None => return Outcome::Discarded(DiscardReason::UnresolvedIsin),
            Some(candidate) if is_valid_isin(&candidate) => candidate,
            Some(candidate) => return Outcome::Discarded(DiscardReason::InvalidIsin(candidate)),
        };

        if self.cache.contains(&identity) {
            return Outcome::Discarded(DiscardReason::Duplicate);
        }

        let announcement = Announcement {
            identity: identity.clone(),
            security_id: partial.security_id,
            isin,
            symbol: partial.symbol,
            company_name: partial.company_name,
            headline: raw.headline.clone(),
            attachment: raw.attachment.clone(),
            file_url: raw.attachment.as_deref().map(|a| self.deps.source.file_url(a)),
            submitted_at: raw
                .submitted_at_raw
                .as_deref()
                .and_then(|s| parse_timestamp(s, self.settings.source_offset)),
            submitted_at_raw: raw.submitted_at_raw.clone(),
            category,
            narrative,
        };

        let fresh = !self.first_run
            && is_fresh(announcement.submitted_at, now, self.settings.freshness_window);
        let record = announcement.to_record(fresh);

        let store = &self.deps.store;
        let row = &record;
        let stored = self
            .settings
            .retry
            .run("persist", move || store.insert(row))
            .await;
        match stored {
            Ok(InsertOutcome::Inserted) => {}
            Ok(InsertOutcome::AlreadyPresent) => {
                self.cache.add(&identity);
                return Outcome::Discarded(DiscardReason::AlreadyStored);
            }
            Err(e) => {
                tracing::error!(exchange = %self.exchange, corp_id = %record.corp_id, error = ?e, "persist failed, dropping item");
                return Outcome::Failed(FailureStage::Persist);
            }
        }

        self.cache.add(&identity);

        if !fresh {
            return Outcome::Archived;
        }
        let topics = fan_out(self.deps.broadcaster.as_ref(), &record).await;
        Outcome::Broadcast(topics)
    }

    /// Category and narrative for the announcement. Only a failed download is fatal for
    /// the item; classifier trouble degrades to the default category.
    async fn classify(&self, raw: &RawAnnouncement) -> Result<(String, Option<String>), FailureStage> {
        let fallback = (DEFAULT_CATEGORY.to_string(), None);
        let Some(reference) = raw.attachment.as_deref().filter(|_| raw.has_pdf_attachment()) else {
            return Ok(fallback);
        };
        if !self.deps.classifier.is_enabled() {
            return Ok(fallback);
        }

        let source = &self.deps.source;
        let dir = self.workdir.path();
        let path = self
            .settings
            .retry
            .run("download attachment", move || source.fetch_attachment(reference, dir))
            .await
            .map_err(|e| {
                tracing::error!(exchange = %self.exchange, reference, error = %e, "attachment download failed");
                FailureStage::Download
            })?;
        let _scratch = ScratchFile(path.clone());

        let t0 = Instant::now();
        let limiter = &self.deps.limiter;
        let classifier = &self.deps.classifier;
        let timeout = self.settings.classify_timeout;
        let doc = path.as_path();
        let result = self
            .settings
            .retry
            .run("classify", move || async move {
                limiter.acquire().await;
                tokio::time::timeout(timeout, classifier.classify(doc))
                    .await
                    .unwrap_or(Err(ClassifyError::Timeout))
            })
            .await;
        histogram!("pipeline_classify_ms", "exchange" => self.exchange.slug())
            .record(t0.elapsed().as_millis() as f64);

        let text = match result {
            Ok(t) => t,
            Err(e) => {
                let reason = if e.is_retryable() { "error" } else { "rejected" };
                counter!("pipeline_classifier_fallbacks_total", "reason" => reason).increment(1);
                tracing::warn!(exchange = %self.exchange, reference, error = %e, "classification failed, using default category");
                return Ok(fallback);
            }
        };
        match interpret(&text) {
            Ok(c) => Ok((c.category, c.narrative)),
            Err(v) => {
                counter!("pipeline_classifier_fallbacks_total", "reason" => "contract").increment(1);
                tracing::warn!(exchange = %self.exchange, reference, violation = %v, "classifier output rejected");
                Ok(fallback)
            }
        }
    }

    /// Poll until `shutdown` flips, sleeping the configured interval between ticks.
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        tracing::info!(exchange = %self.exchange, interval = ?self.settings.poll_interval, "poll loop started");
        loop {
            match self.tick().await {
                Ok(report) => {
                    tracing::debug!(exchange = %self.exchange, report = ?report, "tick finished");
                }
                Err(e) => {
                    tracing::warn!(exchange = %self.exchange, error = ?e, "tick failed");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        if let Err(e) = self.cache.save() {
            tracing::warn!(exchange = %self.exchange, error = ?e, "dedup flush on shutdown failed");
        }
        tracing::info!(exchange = %self.exchange, "poll loop stopped");
    }
}
