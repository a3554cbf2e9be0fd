use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;

use crate::ingest::error::FetchError;
use crate::ingest::normalize_text;
use crate::ingest::providers::bse::clean_company_name;
use crate::ingest::providers::http::{build_client, download_to, field_str, get_json};
use crate::ingest::types::{
    DateRange, Exchange, PartialAnnouncement, RawAnnouncement, SourceAdapter,
};

#[derive(Debug, Clone)]
pub struct NseEndpoints {
    pub base: String,
    /// Pages visited before the API so the session carries the cookies NSE insists on.
    pub bootstrap_paths: Vec<String>,
}

impl Default for NseEndpoints {
    fn default() -> Self {
        Self {
            base: "https://www.nseindia.com".into(),
            bootstrap_paths: vec![
                "/".into(),
                "/companies-listing/corporate-filings-announcements".into(),
            ],
        }
    }
}

pub struct NseAdapter {
    client: reqwest::Client,
    endpoints: NseEndpoints,
}

impl NseAdapter {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_endpoints(NseEndpoints::default(), timeout)
    }

    pub fn with_endpoints(endpoints: NseEndpoints, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client(timeout, true)?,
            endpoints,
        })
    }

    fn referer(&self) -> String {
        format!("{}/", self.endpoints.base.trim_end_matches('/'))
    }

    /// Warm the cookie jar. Failures are logged; the API call decides whether it mattered.
    async fn bootstrap_session(&self) {
        let mut referer: Option<String> = None;
        for path in &self.endpoints.bootstrap_paths {
            let url = format!("{}{}", self.endpoints.base.trim_end_matches('/'), path);
            let mut req = self.client.get(&url).header(reqwest::header::ACCEPT, "text/html");
            if let Some(r) = &referer {
                req = req.header(reqwest::header::REFERER, r.as_str());
            }
            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(url, status = resp.status().as_u16(), "nse session page");
                }
                Ok(resp) => {
                    tracing::warn!(url, status = resp.status().as_u16(), "nse session page refused");
                }
                Err(e) => {
                    tracing::warn!(url, error = %e, "nse session bootstrap failed");
                }
            }
            referer = Some(self.referer());
        }
    }
}

/// Map the top-level array of the announcements API.
pub fn parse_announcements(body: &Value) -> Result<Vec<RawAnnouncement>, FetchError> {
    let rows = body
        .as_array()
        .ok_or_else(|| FetchError::Decode("expected a JSON array of announcements".into()))?;

    Ok(rows
        .iter()
        .map(|row| RawAnnouncement {
            exchange: Exchange::Nse,
            upstream_id: field_str(row, "seq_id"),
            security_id: None,
            symbol: field_str(row, "symbol").map(|s| s.to_ascii_uppercase()),
            company_name: field_str(row, "sm_name").map(|n| clean_company_name(&n)),
            isin: field_str(row, "sm_isin"),
            headline: field_str(row, "attchmntText")
                .map(|t| normalize_text(&t))
                .or_else(|| field_str(row, "desc"))
                .unwrap_or_default(),
            attachment: field_str(row, "attchmntFile"),
            submitted_at_raw: field_str(row, "sort_date").or_else(|| field_str(row, "an_dt")),
        })
        .collect())
}

#[async_trait]
impl SourceAdapter for NseAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Nse
    }

    async fn fetch_batch(&self, range: &DateRange) -> Result<Vec<RawAnnouncement>, FetchError> {
        let t0 = Instant::now();
        self.bootstrap_session().await;

        let from = range.from.format("%d-%m-%Y").to_string();
        let to = range.to.format("%d-%m-%Y").to_string();
        let url = format!(
            "{}/api/corporate-announcements",
            self.endpoints.base.trim_end_matches('/')
        );
        let query = [
            ("index", "equities"),
            ("from_date", from.as_str()),
            ("to_date", to.as_str()),
        ];
        let referer = self.referer();
        let body = get_json(&self.client, &url, &query, Some(&referer)).await?;
        let out = parse_announcements(&body)?;

        counter!("ingest_events_total", "exchange" => "nse").increment(out.len() as u64);
        histogram!("ingest_fetch_ms", "exchange" => "nse").record(t0.elapsed().as_millis() as f64);
        Ok(out)
    }

    async fn resolve_identity(
        &self,
        raw: &RawAnnouncement,
    ) -> Result<PartialAnnouncement, FetchError> {
        Ok(PartialAnnouncement {
            isin: raw.isin.clone(),
            security_id: raw.security_id.clone(),
            symbol: raw.symbol.clone(),
            company_name: raw.company_name.clone(),
        })
    }

    async fn fetch_attachment(&self, reference: &str, dir: &Path) -> Result<PathBuf, FetchError> {
        let url = self.file_url(reference);
        let referer = self.referer();
        download_to(&self.client, &url, Some(&referer), dir).await
    }

    fn file_url(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }
        format!(
            "{}/{}",
            self.endpoints.base.trim_end_matches('/'),
            reference.trim_start_matches('/')
        )
    }
}
