// src/ingest/types.rs
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ingest::error::FetchError;

/// Category assigned when classification is skipped, fails or breaks its contract.
pub const DEFAULT_CATEGORY: &str = "Procedural/Administrative";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Bse,
    Nse,
}

impl Exchange {
    /// Lowercase tag used in state file names, metric labels and identity keys.
    pub fn slug(self) -> &'static str {
        match self {
            Exchange::Bse => "bse",
            Exchange::Nse => "nse",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Bse => f.write_str("BSE"),
            Exchange::Nse => f.write_str("NSE"),
        }
    }
}

impl std::str::FromStr for Exchange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bse" => Ok(Exchange::Bse),
            "nse" => Ok(Exchange::Nse),
            other => anyhow::bail!("unknown exchange: {other}"),
        }
    }
}

/// Adapter-normalized feed record. Nothing past the adapter boundary sees exchange JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnnouncement {
    pub exchange: Exchange,
    pub upstream_id: Option<String>,
    pub security_id: Option<String>,
    pub symbol: Option<String>,
    pub company_name: Option<String>,
    /// Present when the feed carries the ISIN inline (NSE).
    pub isin: Option<String>,
    pub headline: String,
    pub attachment: Option<String>,
    pub submitted_at_raw: Option<String>,
}

impl RawAnnouncement {
    pub fn new(exchange: Exchange, headline: impl Into<String>) -> Self {
        Self {
            exchange,
            upstream_id: None,
            security_id: None,
            symbol: None,
            company_name: None,
            isin: None,
            headline: headline.into(),
            attachment: None,
            submitted_at_raw: None,
        }
    }

    /// Cursor comparison: the fields that change whenever the exchange publishes a new item.
    pub fn same_as(&self, other: &RawAnnouncement) -> bool {
        self.security_id == other.security_id
            && self.headline == other.headline
            && self.submitted_at_raw == other.submitted_at_raw
            && self.attachment == other.attachment
    }

    pub fn has_pdf_attachment(&self) -> bool {
        self.attachment.as_deref().is_some_and(is_pdf_reference)
    }
}

/// True when the reference names a PDF, ignoring case and any query string.
pub fn is_pdf_reference(reference: &str) -> bool {
    let path = reference.split(['?', '#']).next().unwrap_or_default();
    path.trim().to_ascii_lowercase().ends_with(".pdf")
}

/// Filer identity as resolved by the adapter (ISIN not yet validated).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialAnnouncement {
    pub isin: Option<String>,
    pub security_id: Option<String>,
    pub symbol: Option<String>,
    pub company_name: Option<String>,
}

/// Composite identity: exchange-assigned id when present, content fingerprint otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub exchange: Exchange,
    pub upstream_id: Option<String>,
    pub fingerprint: Option<String>,
}

impl Identity {
    pub fn for_raw(raw: &RawAnnouncement) -> Self {
        let upstream_id = raw
            .upstream_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let fingerprint = crate::ingest::dedup::content_hash(
            raw.company_name.as_deref(),
            raw.symbol.as_deref(),
            Some(raw.headline.as_str()),
            None,
            raw.attachment.as_deref(),
        );
        Self {
            exchange: raw.exchange,
            upstream_id,
            fingerprint,
        }
    }

    /// Stable key, `None` when neither an upstream id nor a fingerprint is available.
    pub fn key(&self) -> Option<String> {
        let ex = self.exchange.slug();
        match (&self.upstream_id, &self.fingerprint) {
            (Some(id), _) => Some(format!("{ex}:id:{id}")),
            (None, Some(fp)) => Some(format!("{ex}:fp:{fp}")),
            (None, None) => None,
        }
    }
}

/// A fully processed announcement, ready for persistence and fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub identity: Identity,
    pub security_id: Option<String>,
    pub isin: String,
    pub symbol: Option<String>,
    pub company_name: Option<String>,
    pub headline: String,
    pub attachment: Option<String>,
    pub file_url: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submitted_at_raw: Option<String>,
    pub category: String,
    pub narrative: Option<String>,
}

impl Announcement {
    /// Deterministic store key derived from the identity so replays collide in the store too.
    pub fn corp_id(&self) -> String {
        let seed = self
            .identity
            .key()
            .unwrap_or_else(|| format!("{}:{}", self.isin, self.headline));
        corp_id_from(&seed)
    }

    /// Store row. Dates are written as naive IST, the layout the exchanges publish.
    pub fn to_record(&self, is_fresh: bool) -> FilingRecord {
        FilingRecord {
            corp_id: self.corp_id(),
            securityid: self.security_id.clone(),
            summary: Some(self.headline.clone()),
            fileurl: self.file_url.clone(),
            date: self
                .submitted_at
                .map(|t| {
                    t.with_timezone(&crate::ingest::timestamp::ist())
                        .format("%Y-%m-%dT%H:%M:%S")
                        .to_string()
                })
                .or_else(|| self.submitted_at_raw.clone()),
            ai_summary: self.narrative.clone(),
            category: Some(self.category.clone()),
            isin: Some(self.isin.clone()),
            companyname: self.company_name.clone(),
            symbol: self.symbol.clone(),
            is_fresh: Some(is_fresh),
            broadcast: None,
        }
    }
}

/// UUID-shaped hex digest of the seed.
pub fn corp_id_from(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let hex: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Row shape shared by the store, the ingestion endpoint and websocket subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FilingRecord {
    pub corp_id: String,
    #[serde(default)]
    pub securityid: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub fileurl: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub isin: Option<String>,
    #[serde(default)]
    pub companyname: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_fresh: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<bool>,
}

impl FilingRecord {
    pub fn wants_broadcast(&self) -> bool {
        self.is_fresh.unwrap_or(false) || self.broadcast.unwrap_or(false)
    }

    /// Copy without transport-only flags, as persisted.
    pub fn for_storage(&self) -> FilingRecord {
        FilingRecord {
            is_fresh: None,
            broadcast: None,
            ..self.clone()
        }
    }
}

/// Inclusive calendar range of a feed request, in exchange-local dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: chrono::NaiveDate,
    pub to: chrono::NaiveDate,
}

impl DateRange {
    pub fn single(day: chrono::NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    /// Today's date at the given UTC offset.
    pub fn today(offset: chrono::FixedOffset) -> Self {
        Self::single(Utc::now().with_timezone(&offset).date_naive())
    }
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Announcements for the range, newest first.
    async fn fetch_batch(&self, range: &DateRange) -> Result<Vec<RawAnnouncement>, FetchError>;

    async fn resolve_identity(
        &self,
        raw: &RawAnnouncement,
    ) -> Result<PartialAnnouncement, FetchError>;

    /// Download the attachment into `dir`, returning the local path.
    async fn fetch_attachment(&self, reference: &str, dir: &Path) -> Result<PathBuf, FetchError>;

    /// Externally resolvable URL for an attachment reference.
    fn file_url(&self, reference: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_detection_ignores_case_and_query() {
        assert!(is_pdf_reference("AR_2025.pdf"));
        assert!(is_pdf_reference("https://x.test/a/B.PDF?download=1"));
        assert!(!is_pdf_reference("notice.xml"));
        assert!(!is_pdf_reference(""));
    }

    #[test]
    fn identity_prefers_upstream_id() {
        let mut raw = RawAnnouncement::new(Exchange::Bse, "Board Meeting Outcome");
        raw.company_name = Some("Acme".into());
        let fp_only = Identity::for_raw(&raw);
        assert!(fp_only.key().unwrap().starts_with("bse:fp:"));

        raw.upstream_id = Some(" 42 ".into());
        let with_id = Identity::for_raw(&raw);
        assert_eq!(with_id.key().as_deref(), Some("bse:id:42"));
    }

    #[test]
    fn corp_id_is_stable_and_uuid_shaped() {
        let a = corp_id_from("bse:id:1");
        let b = corp_id_from("bse:id:1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 36);
        assert_eq!(a.matches('-').count(), 4);
        assert_ne!(a, corp_id_from("bse:id:2"));
    }

    #[test]
    fn storage_copy_drops_transport_flags() {
        let rec = FilingRecord {
            corp_id: "x".into(),
            is_fresh: Some(true),
            broadcast: Some(true),
            ..Default::default()
        };
        assert!(rec.wants_broadcast());
        let stored = rec.for_storage();
        assert_eq!(stored.is_fresh, None);
        assert!(!stored.wants_broadcast());
    }
}
