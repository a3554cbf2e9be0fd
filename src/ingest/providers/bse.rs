use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;

use crate::ingest::error::FetchError;
use crate::ingest::providers::http::{build_client, download_to, field_str, get_json};
use crate::ingest::types::{
    DateRange, Exchange, PartialAnnouncement, RawAnnouncement, SourceAdapter,
};

#[derive(Debug, Clone)]
pub struct BseEndpoints {
    pub api_base: String,
    pub attachment_base: String,
    pub referer: String,
}

impl Default for BseEndpoints {
    fn default() -> Self {
        Self {
            api_base: "https://api.bseindia.com/BseIndiaAPI/api".into(),
            attachment_base: "https://www.bseindia.com/xml-data/corpfiling/AttachLive".into(),
            referer: "https://www.bseindia.com/".into(),
        }
    }
}

pub struct BseAdapter {
    client: reqwest::Client,
    endpoints: BseEndpoints,
}

impl BseAdapter {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_endpoints(BseEndpoints::default(), timeout)
    }

    pub fn with_endpoints(endpoints: BseEndpoints, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client(timeout, false)?,
            endpoints,
        })
    }
}

/// Symbol from a company page URL: the segment just before a trailing numeric scrip code.
pub fn extract_symbol(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    match segments.as_slice() {
        [.., sym, code] if code.chars().all(|c| c.is_ascii_digit()) => {
            Some(sym.to_ascii_uppercase())
        }
        _ => None,
    }
}

/// Drop the trailing " LTD" BSE appends to long names.
pub fn clean_company_name(name: &str) -> String {
    let t = name.trim();
    t.strip_suffix(" LTD").unwrap_or(t).trim_end().to_string()
}

/// Map the `Table` array of an announcements response. Rows without a scrip code, and
/// the placeholder scrip `1`, are dropped here.
pub fn parse_announcements(body: &Value) -> Result<Vec<RawAnnouncement>, FetchError> {
    let rows = body
        .get("Table")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Decode("missing `Table` array".into()))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(scrip) = field_str(row, "SCRIP_CD") else {
            tracing::debug!("bse row without scrip code skipped");
            continue;
        };
        if scrip == "1" {
            continue;
        }
        out.push(RawAnnouncement {
            exchange: Exchange::Bse,
            upstream_id: field_str(row, "NEWSID"),
            security_id: Some(scrip),
            symbol: field_str(row, "NSURL").and_then(|u| extract_symbol(&u)),
            company_name: field_str(row, "SLONGNAME").map(|n| clean_company_name(&n)),
            isin: None,
            headline: field_str(row, "HEADLINE").unwrap_or_default(),
            attachment: field_str(row, "ATTACHMENTNAME"),
            submitted_at_raw: field_str(row, "News_submission_dt"),
        });
    }
    Ok(out)
}

#[async_trait]
impl SourceAdapter for BseAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Bse
    }

    async fn fetch_batch(&self, range: &DateRange) -> Result<Vec<RawAnnouncement>, FetchError> {
        let t0 = Instant::now();
        let from = range.from.format("%Y%m%d").to_string();
        let to = range.to.format("%Y%m%d").to_string();
        let url = format!("{}/AnnSubCategoryGetData/w", self.endpoints.api_base);
        let query = [
            ("pageno", "1"),
            ("strCat", "-1"),
            ("strPrevDate", from.as_str()),
            ("strScrip", ""),
            ("strSearch", "P"),
            ("strToDate", to.as_str()),
            ("strType", "C"),
            ("subcategory", "-1"),
        ];
        let body = get_json(&self.client, &url, &query, Some(&self.endpoints.referer)).await?;
        let out = parse_announcements(&body)?;

        counter!("ingest_events_total", "exchange" => "bse").increment(out.len() as u64);
        histogram!("ingest_fetch_ms", "exchange" => "bse").record(t0.elapsed().as_millis() as f64);
        Ok(out)
    }

    async fn resolve_identity(
        &self,
        raw: &RawAnnouncement,
    ) -> Result<PartialAnnouncement, FetchError> {
        let mut partial = PartialAnnouncement {
            isin: raw.isin.clone(),
            security_id: raw.security_id.clone(),
            symbol: raw.symbol.clone(),
            company_name: raw.company_name.clone(),
        };
        if partial.isin.is_some() {
            return Ok(partial);
        }
        let Some(scrip) = raw.security_id.as_deref() else {
            return Ok(partial);
        };
        let url = format!("{}/ComHeadernew/w", self.endpoints.api_base);
        let body = get_json(
            &self.client,
            &url,
            &[("quotetype", "EQ"), ("scripcode", scrip), ("seriesid", "")],
            Some(&self.endpoints.referer),
        )
        .await?;
        partial.isin = field_str(&body, "ISIN");
        tracing::debug!(scrip, isin = ?partial.isin, "bse isin lookup");
        Ok(partial)
    }

    async fn fetch_attachment(&self, reference: &str, dir: &Path) -> Result<PathBuf, FetchError> {
        let url = self.file_url(reference);
        download_to(&self.client, &url, Some(&self.endpoints.referer), dir).await
    }

    fn file_url(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }
        format!(
            "{}/{}",
            self.endpoints.attachment_base.trim_end_matches('/'),
            reference.trim_start_matches('/')
        )
    }
}
