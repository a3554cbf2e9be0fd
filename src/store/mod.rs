//! Durable announcement table behind a small trait, with an in-process backend for
//! tests and local runs and a PostgREST-compatible HTTP backend for production.

pub mod memory;
pub mod rest;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::StoreConfig;
use crate::ingest::types::FilingRecord;

pub use memory::MemoryStore;
pub use rest::RestStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same `corp_id` already exists.
    AlreadyPresent,
}

/// Filters of the filings query surface; all optional, dates inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilingQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub category: Option<String>,
    pub symbol: Option<String>,
    pub isin: Option<String>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait AnnouncementStore: Send + Sync {
    /// Idempotent on `corp_id`.
    async fn insert(&self, record: &FilingRecord) -> Result<InsertOutcome>;

    /// Matching rows, newest first.
    async fn query(&self, q: &FilingQuery) -> Result<Vec<FilingRecord>>;

    fn name(&self) -> &'static str;
}

pub type DynStore = Arc<dyn AnnouncementStore>;

pub fn build_store(cfg: &StoreConfig, timeout: std::time::Duration) -> Result<DynStore> {
    Ok(match cfg {
        StoreConfig::Memory => Arc::new(MemoryStore::default()),
        StoreConfig::Rest { url, key, table } => {
            Arc::new(RestStore::new(url, key, table, timeout)?)
        }
    })
}
