// src/broadcast/mod.rs
pub mod hub;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::ingest::types::FilingRecord;

pub use hub::{Hub, Published};

/// Room names are capped at this many characters.
pub const MAX_ROOM_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    All,
    Isin(String),
    Symbol(String),
    Company(String),
    Category(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::All => f.write_str("all"),
            Topic::Isin(v) | Topic::Symbol(v) => f.write_str(v),
            Topic::Company(v) => write!(f, "company:{v}"),
            Topic::Category(v) => write!(f, "category:{v}"),
        }
    }
}

/// Trim and cap a client-supplied room name; `None` when nothing is left.
pub fn room_name(raw: &str) -> Option<String> {
    let t: String = raw.trim().chars().take(MAX_ROOM_LEN).collect();
    let t = t.trim().to_string();
    (!t.is_empty()).then_some(t)
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Every topic a record fans out to; empty fields produce no topic.
pub fn topics_for(record: &FilingRecord) -> Vec<Topic> {
    let mut out = vec![Topic::All];
    if let Some(v) = non_empty(&record.isin) {
        out.push(Topic::Isin(v.to_string()));
    }
    if let Some(v) = non_empty(&record.symbol) {
        out.push(Topic::Symbol(v.to_string()));
    }
    if let Some(v) = non_empty(&record.companyname) {
        out.push(Topic::Company(v.to_string()));
    }
    if let Some(v) = non_empty(&record.category) {
        out.push(Topic::Category(v.to_string()));
    }
    out.dedup_by(|a, b| a.to_string() == b.to_string());
    out
}

/// A subscriber's watchlist: which ISINs and categories it wants pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistSubscription {
    #[serde(default)]
    pub isins: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl WatchlistSubscription {
    pub fn topics(&self) -> Vec<Topic> {
        let isins = self
            .isins
            .iter()
            .filter_map(|i| room_name(i))
            .map(|i| Topic::Isin(i.to_ascii_uppercase()));
        let cats = self
            .categories
            .iter()
            .filter_map(|c| room_name(c))
            .map(Topic::Category);
        isins.chain(cats).collect()
    }
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, topic: &Topic, record: &FilingRecord) -> Result<()>;
}

pub type DynBroadcaster = Arc<dyn Broadcaster>;

/// Publish to every topic of the record. Failures are logged per topic and never
/// abort the rest; returns the topics that were accepted.
pub async fn fan_out(broadcaster: &dyn Broadcaster, record: &FilingRecord) -> Vec<Topic> {
    let mut sent = Vec::new();
    for topic in topics_for(record) {
        match broadcaster.publish(&topic, record).await {
            Ok(()) => {
                counter!("broadcast_published_total").increment(1);
                sent.push(topic);
            }
            Err(e) => {
                tracing::warn!(topic = %topic, corp_id = %record.corp_id, error = ?e, "publish failed");
            }
        }
    }
    sent
}
