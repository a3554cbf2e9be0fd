use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use crate::ingest::types::FilingRecord;
use crate::store::{AnnouncementStore, FilingQuery, InsertOutcome};

/// Table exposed through a PostgREST-style endpoint (`{url}/rest/v1/{table}`).
pub struct RestStore {
    http: reqwest::Client,
    table_url: String,
    key: String,
}

impl RestStore {
    pub fn new(url: &str, key: &str, table: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("filings-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()
            .context("building store http client")?;
        Ok(Self {
            http,
            table_url: format!("{}/rest/v1/{}", url.trim_end_matches('/'), table),
            key: key.to_string(),
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }
}

/// PostgREST filter parameters for a query, newest first.
pub fn query_params(q: &FilingQuery) -> Vec<(String, String)> {
    let mut p = vec![
        ("select".to_string(), "*".to_string()),
        ("order".to_string(), "date.desc".to_string()),
    ];
    if let Some(s) = q.start {
        p.push(("date".into(), format!("gte.{}", s.format("%Y-%m-%d"))));
    }
    if let Some(e) = q.end {
        p.push(("date".into(), format!("lte.{}T23:59:59", e.format("%Y-%m-%d"))));
    }
    for (col, val) in [("category", &q.category), ("symbol", &q.symbol), ("isin", &q.isin)] {
        if let Some(v) = val.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            p.push((col.into(), format!("eq.{v}")));
        }
    }
    if let Some(l) = q.limit {
        p.push(("limit".into(), l.to_string()));
    }
    p
}

/// Interpret a 2xx insert body. With `return=representation` the inserted rows come
/// back and an ignored duplicate yields `[]`; an empty body means the server skipped
/// the representation, which only happens on a write.
pub fn insert_outcome(body: &str) -> Result<InsertOutcome> {
    if body.trim().is_empty() {
        return Ok(InsertOutcome::Inserted);
    }
    let rows: Vec<serde_json::Value> =
        serde_json::from_str(body).context("decoding insert response")?;
    Ok(if rows.is_empty() {
        InsertOutcome::AlreadyPresent
    } else {
        InsertOutcome::Inserted
    })
}

#[async_trait]
impl AnnouncementStore for RestStore {
    async fn insert(&self, record: &FilingRecord) -> Result<InsertOutcome> {
        let resp = self
            .authed(self.http.post(&self.table_url))
            .query(&[("on_conflict", "corp_id")])
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(&[record.for_storage()])
            .send()
            .await
            .context("store insert request")?;

        if resp.status() == StatusCode::CONFLICT {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        let resp = resp.error_for_status().context("store insert rejected")?;
        let body = resp.text().await.context("reading insert response")?;
        insert_outcome(&body)
    }

    async fn query(&self, q: &FilingQuery) -> Result<Vec<FilingRecord>> {
        let rows = self
            .authed(self.http.get(&self.table_url))
            .query(&query_params(q))
            .send()
            .await
            .context("store query request")?
            .error_for_status()
            .context("store query rejected")?
            .json::<Vec<FilingRecord>>()
            .await
            .context("decoding store rows")?;
        Ok(rows)
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}
