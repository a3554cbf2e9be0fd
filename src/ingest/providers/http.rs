// src/ingest/providers/http.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use serde_json::Value;

use crate::ingest::error::FetchError;

/// Exchanges reject obvious bots; look like a desktop browser.
pub const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub fn build_client(timeout: Duration, cookies: bool) -> Result<reqwest::Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    reqwest::Client::builder()
        .user_agent(BROWSER_UA)
        .default_headers(headers)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .timeout(timeout)
        .cookie_store(cookies)
        .build()
        .map_err(|e| FetchError::Transport(format!("building http client: {e}")))
}

/// GET and decode a JSON body, mapping non-2xx to `FetchError::Status`.
pub async fn get_json(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, &str)],
    referer: Option<&str>,
) -> Result<Value, FetchError> {
    let mut req = client.get(url).query(query);
    if let Some(r) = referer {
        req = req.header(reqwest::header::REFERER, r);
    }
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    let body = resp.text().await?;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(FetchError::Decode("empty body".into()));
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Stream a document into `dir`, named after the last URL segment.
pub async fn download_to(
    client: &reqwest::Client,
    url: &str,
    referer: Option<&str>,
    dir: &Path,
) -> Result<PathBuf, FetchError> {
    let mut req = client.get(url);
    if let Some(r) = referer {
        req = req.header(reqwest::header::REFERER, r);
    }
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    let bytes = resp.bytes().await?;
    let path = dir.join(local_file_name(url));
    tokio::fs::write(&path, &bytes).await?;
    tracing::debug!(url, bytes = bytes.len(), path = %path.display(), "attachment downloaded");
    Ok(path)
}

/// Safe local name for a remote document.
pub fn local_file_name(url: &str) -> String {
    let last = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    if cleaned.is_empty() || cleaned.starts_with('.') {
        "attachment.pdf".to_string()
    } else {
        cleaned
    }
}

/// String view of a JSON field that exchanges send as either text or number.
pub fn field_str(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
