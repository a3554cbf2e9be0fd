//! Process configuration read from the environment (after `.env` via dotenvy) plus the
//! file-based sub-configs. Anything invalid or missing that the process cannot run
//! without is an error here, before any worker starts.

pub mod classifier;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;

use crate::config::classifier::ClassifierConfig;
use crate::ingest::cursor::FirstRunMode;
use crate::ingest::dedup::DedupConfig;
use crate::ingest::filter::KeywordPolicy;
use crate::ingest::retry::RetryPolicy;
use crate::ingest::timestamp::IST_OFFSET_SECS;
use crate::ingest::types::Exchange;
use crate::pipeline::PipelineSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Rest {
        url: String,
        key: String,
        table: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub exchanges: Vec<Exchange>,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
    pub freshness_window: chrono::Duration,
    pub source_offset: FixedOffset,
    pub state_dir: PathBuf,
    pub first_run_mode: FirstRunMode,
    pub backfill_item_delay: Duration,
    pub dedup_max_size: usize,
    pub dedup_evict_to: usize,
    pub dedup_persist_every: usize,
    /// One classifier budget across exchanges instead of one per exchange.
    pub shared_limiter: bool,
    pub classifier: ClassifierConfig,
    pub keywords: KeywordPolicy,
    pub store: StoreConfig,
    pub bind_addr: SocketAddr,
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={v:?}: {e}")),
        _ => Ok(default),
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn required(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("missing required env var {key}"))
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let exchanges = std::env::var("ENABLED_EXCHANGES")
            .unwrap_or_else(|_| "bse,nse".into())
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Exchange::from_str)
            .collect::<Result<Vec<_>>>()?;
        anyhow::ensure!(!exchanges.is_empty(), "ENABLED_EXCHANGES selects no exchange");

        let offset_minutes: i32 = env_or("SOURCE_UTC_OFFSET_MINUTES", IST_OFFSET_SECS / 60)?;
        let source_offset = FixedOffset::east_opt(offset_minutes * 60)
            .with_context(|| format!("SOURCE_UTC_OFFSET_MINUTES out of range: {offset_minutes}"))?;

        let dedup_max_size: usize = env_or("DEDUP_MAX_SIZE", 5_000)?;
        let dedup_evict_to: usize = env_or("DEDUP_EVICT_TO", dedup_max_size / 2)?;

        let store = match std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "rest".into())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StoreConfig::Memory,
            "rest" => StoreConfig::Rest {
                url: required("STORE_URL")?,
                key: required("STORE_KEY")?,
                table: std::env::var("STORE_TABLE").unwrap_or_else(|_| "corporatefilings".into()),
            },
            other => anyhow::bail!("unknown STORE_BACKEND: {other}"),
        };

        Ok(Self {
            exchanges,
            poll_interval: Duration::from_secs(env_or("POLL_INTERVAL_SECS", 10)?),
            http_timeout: Duration::from_secs(env_or("HTTP_TIMEOUT_SECS", 30)?),
            retry: RetryPolicy {
                max_attempts: env_or("MAX_RETRIES", 3)?,
                base_delay: Duration::from_millis(env_or("RETRY_BASE_MS", 1_000)?),
            },
            freshness_window: chrono::Duration::seconds(env_or("FRESHNESS_WINDOW_SECS", 7_200)?),
            source_offset,
            state_dir: PathBuf::from(env_or("STATE_DIR", "data".to_string())?),
            first_run_mode: env_or("FIRST_RUN_MODE", FirstRunMode::Marker)?,
            backfill_item_delay: Duration::from_millis(env_or("BACKFILL_ITEM_DELAY_MS", 1_000)?),
            dedup_max_size,
            dedup_evict_to,
            dedup_persist_every: env_or("DEDUP_PERSIST_EVERY", 10)?,
            shared_limiter: env_flag("CLASSIFIER_SHARED_LIMITER", true),
            classifier: ClassifierConfig::load_default()?,
            keywords: crate::ingest::config::load_policy_default()?,
            store,
            bind_addr: env_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 5001)))?,
        })
    }

    /// Settings for one exchange worker.
    pub fn pipeline_settings(&self, exchange: Exchange) -> PipelineSettings {
        PipelineSettings {
            poll_interval: self.poll_interval,
            retry: self.retry,
            freshness_window: self.freshness_window,
            source_offset: self.source_offset,
            state_dir: self.state_dir.clone(),
            first_run_mode: self.first_run_mode,
            backfill_item_delay: self.backfill_item_delay,
            classify_timeout: Duration::from_secs(self.classifier.timeout_secs.max(1)),
            keywords: self.keywords.clone(),
            dedup: DedupConfig {
                max_size: self.dedup_max_size,
                evict_to: self.dedup_evict_to,
                persist_path: Some(
                    self.state_dir
                        .join(format!("{}_dedup_cache.json", exchange.slug())),
                ),
                persist_every: self.dedup_persist_every,
            },
        }
    }
}
