use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::ingest::timestamp::{ist, parse_timestamp};
use crate::ingest::types::FilingRecord;
use crate::store::{AnnouncementStore, FilingQuery, InsertOutcome};

/// In-process table. Also counts insert attempts so tests can assert on them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<FilingRecord>>,
    attempts: AtomicUsize,
    fail_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn rows(&self) -> Vec<FilingRecord> {
        self.rows.read().await.clone()
    }

    /// Make every subsequent insert fail (outage simulation).
    pub fn set_failing(&self, failing: bool) {
        self.fail_inserts.store(failing, Ordering::SeqCst);
    }
}

fn record_time(r: &FilingRecord) -> Option<DateTime<Utc>> {
    r.date.as_deref().and_then(|d| parse_timestamp(d, ist()))
}

fn eq_ci(filter: &Option<String>, value: &Option<String>) -> bool {
    match filter {
        None => true,
        Some(f) => value.as_deref().is_some_and(|v| v.eq_ignore_ascii_case(f.trim())),
    }
}

pub(crate) fn record_matches(q: &FilingQuery, r: &FilingRecord) -> bool {
    if !eq_ci(&q.category, &r.category) || !eq_ci(&q.symbol, &r.symbol) || !eq_ci(&q.isin, &r.isin)
    {
        return false;
    }
    if q.start.is_none() && q.end.is_none() {
        return true;
    }
    let Some(day) = record_time(r).map(|t| t.with_timezone(&ist()).date_naive()) else {
        return false;
    };
    q.start.map_or(true, |s| day >= s) && q.end.map_or(true, |e| day <= e)
}

#[async_trait]
impl AnnouncementStore for MemoryStore {
    async fn insert(&self, record: &FilingRecord) -> Result<InsertOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(!self.fail_inserts.load(Ordering::SeqCst), "store unavailable");
        let mut rows = self.rows.write().await;
        if rows.iter().any(|r| r.corp_id == record.corp_id) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        rows.push(record.for_storage());
        Ok(InsertOutcome::Inserted)
    }

    async fn query(&self, q: &FilingQuery) -> Result<Vec<FilingRecord>> {
        let rows = self.rows.read().await;
        let mut out: Vec<FilingRecord> = rows.iter().filter(|r| record_matches(q, r)).cloned().collect();
        out.sort_by_key(|r| std::cmp::Reverse(record_time(r)));
        if let Some(limit) = q.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
