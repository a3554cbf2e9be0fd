//! Bounded LRU memory of processed announcements.
//!
//! Entries are keyed by identity and also indexed by content hash, so a re-published
//! item with a fresh upstream id is still caught. Optional JSON persistence keeps the
//! horizon across restarts.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ingest::types::Identity;

/// Prefix length of the headline that feeds the content hash.
const HEADLINE_PREFIX_CHARS: usize = 100;

/// SHA-256 over the best available descriptive fields.
///
/// Prefers `company:headline`, then `symbol:headline`, then the first non-empty of
/// headline, narrative, attachment. `None` when nothing usable exists.
pub fn content_hash(
    company: Option<&str>,
    symbol: Option<&str>,
    headline: Option<&str>,
    narrative: Option<&str>,
    attachment: Option<&str>,
) -> Option<String> {
    fn clean(v: Option<&str>) -> Option<&str> {
        v.map(str::trim).filter(|s| !s.is_empty())
    }
    let headline = clean(headline).map(|h| h.chars().take(HEADLINE_PREFIX_CHARS).collect::<String>());

    let material = match (clean(company), clean(symbol), headline.as_deref()) {
        (Some(c), _, Some(h)) => format!("{c}:{h}"),
        (None, Some(s), Some(h)) => format!("{s}:{h}"),
        (_, _, Some(h)) => h.to_string(),
        _ => clean(narrative)
            .map(|n| n.chars().take(HEADLINE_PREFIX_CHARS).collect())
            .or_else(|| clean(attachment).map(str::to_string))?,
    };

    let digest = Sha256::digest(material.to_lowercase().as_bytes());
    Some(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub max_size: usize,
    /// Size to trim down to once `max_size` is exceeded.
    pub evict_to: usize,
    pub persist_path: Option<PathBuf>,
    /// Save after every Nth insert; 0 disables periodic saves.
    pub persist_every: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_size: 5_000,
            evict_to: 2_500,
            persist_path: None,
            persist_every: 10,
        }
    }
}

impl DedupConfig {
    pub fn in_memory(max_size: usize) -> Self {
        Self {
            max_size,
            evict_to: max_size / 2,
            persist_path: None,
            persist_every: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    content_hash: Option<String>,
    first_seen_at: DateTime<Utc>,
    tick: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    identity: String,
    #[serde(default)]
    content_hash: Option<String>,
    first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCache {
    entries: Vec<PersistedEntry>,
}

#[derive(Debug)]
pub struct DedupCache {
    cfg: DedupConfig,
    entries: HashMap<String, Entry>,
    by_hash: HashMap<String, String>,
    order: BTreeMap<u64, String>,
    next_tick: u64,
    inserts_since_save: usize,
}

impl DedupCache {
    pub fn new(mut cfg: DedupConfig) -> Self {
        cfg.max_size = cfg.max_size.max(1);
        cfg.evict_to = cfg.evict_to.min(cfg.max_size);
        Self {
            cfg,
            entries: HashMap::new(),
            by_hash: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            inserts_since_save: 0,
        }
    }

    /// Build and reload from `persist_path`; unreadable state starts empty.
    pub fn load(cfg: DedupConfig) -> Self {
        let path = cfg.persist_path.clone();
        let mut cache = Self::new(cfg);
        let Some(path) = path else {
            return cache;
        };
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return cache,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "dedup state unreadable, starting empty");
                return cache;
            }
        };
        match serde_json::from_str::<PersistedCache>(&raw) {
            Ok(p) => {
                for e in p.entries {
                    cache.insert_entry(e.identity, e.content_hash, e.first_seen_at);
                }
                cache.enforce_capacity();
                tracing::info!(path = %path.display(), entries = cache.len(), "dedup state restored");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "dedup state corrupt, starting empty");
            }
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seen before, by identity or by content hash. A hit refreshes recency.
    pub fn contains(&mut self, identity: &Identity) -> bool {
        let hit = identity
            .key()
            .filter(|k| self.entries.contains_key(k))
            .or_else(|| {
                identity
                    .fingerprint
                    .as_ref()
                    .and_then(|h| self.by_hash.get(h).cloned())
            });
        match hit {
            Some(key) => {
                self.touch(&key);
                true
            }
            None => false,
        }
    }

    /// Record an identity; returns the key it was stored under.
    pub fn add(&mut self, identity: &Identity) -> String {
        let key = identity.key().unwrap_or_else(|| {
            format!(
                "generated-{}",
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            )
        });
        self.insert_entry(key.clone(), identity.fingerprint.clone(), Utc::now());
        self.enforce_capacity();

        self.inserts_since_save += 1;
        if self.cfg.persist_every > 0 && self.inserts_since_save >= self.cfg.persist_every {
            if let Err(e) = self.save() {
                tracing::warn!(error = ?e, "dedup periodic save failed");
            }
        }
        key
    }

    /// Write the cache to `persist_path` (no-op without one).
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.cfg.persist_path.clone() else {
            return Ok(());
        };
        let entries = self
            .order
            .values()
            .filter_map(|k| {
                self.entries.get(k).map(|e| PersistedEntry {
                    identity: k.clone(),
                    content_hash: e.content_hash.clone(),
                    first_seen_at: e.first_seen_at,
                })
            })
            .collect();
        let body = serde_json::to_vec(&PersistedCache { entries })?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            f.write_all(&body)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        self.inserts_since_save = 0;
        Ok(())
    }

    fn insert_entry(&mut self, key: String, content_hash: Option<String>, first_seen_at: DateTime<Utc>) {
        let tick = self.bump();
        let first_seen_at = match self.entries.get(&key) {
            Some(old) => {
                self.order.remove(&old.tick);
                old.first_seen_at
            }
            None => first_seen_at,
        };
        if let Some(h) = &content_hash {
            self.by_hash.insert(h.clone(), key.clone());
        }
        self.order.insert(tick, key.clone());
        self.entries.insert(
            key,
            Entry {
                content_hash,
                first_seen_at,
                tick,
            },
        );
    }

    fn touch(&mut self, key: &str) {
        let tick = self.bump();
        if let Some(e) = self.entries.get_mut(key) {
            self.order.remove(&e.tick);
            e.tick = tick;
            self.order.insert(tick, key.to_string());
        }
    }

    fn enforce_capacity(&mut self) {
        if self.entries.len() <= self.cfg.max_size {
            return;
        }
        let before = self.entries.len();
        while self.entries.len() > self.cfg.evict_to {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(e) = self.entries.remove(&key) {
                if let Some(h) = e.content_hash {
                    if self.by_hash.get(&h) == Some(&key) {
                        self.by_hash.remove(&h);
                    }
                }
            }
        }
        tracing::debug!(evicted = before - self.entries.len(), size = self.entries.len(), "dedup eviction");
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}
