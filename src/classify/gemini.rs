use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::classify::{ClassifyError, DocumentClassifier, PROMPT};
use crate::config::classifier::ClassifierConfig;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Gemini `generateContent` with the PDF sent inline.
pub struct GeminiClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    max_document_bytes: u64,
}

impl GeminiClassifier {
    pub fn from_config(cfg: &ClassifierConfig) -> Result<Self> {
        anyhow::ensure!(!cfg.api_key.trim().is_empty(), "classifier api key is empty");
        let http = reqwest::Client::builder()
            .user_agent(concat!("filings-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("building classifier http client")?;
        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            endpoint: cfg
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            max_document_bytes: cfg.max_document_bytes,
        })
    }
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Inline { inline_data: InlineData<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Req<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<RespContent>,
}

#[derive(Deserialize)]
struct RespContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Deserialize)]
struct RespPart {
    text: Option<String>,
}

/// Concatenated text parts of the first candidate.
fn response_text(resp: Resp) -> Option<String> {
    let text: String = resp
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect();
    let t = text.trim();
    (!t.is_empty()).then(|| t.to_string())
}

#[async_trait]
impl DocumentClassifier for GeminiClassifier {
    async fn classify(&self, path: &Path) -> Result<String, ClassifyError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ClassifyError::Rejected(format!("reading {}: {e}", path.display())))?;
        if bytes.len() as u64 > self.max_document_bytes {
            return Err(ClassifyError::Rejected(format!(
                "document {} is {} bytes, above the {} byte limit",
                path.display(),
                bytes.len(),
                self.max_document_bytes
            )));
        }

        let req = Req {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: "application/pdf",
                            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                        },
                    },
                    Part::Text { text: PROMPT },
                ],
            }],
            generation_config: GenerationConfig { temperature: 0.2 },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        );
        let body: Resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response_text(body).ok_or(ClassifyError::Empty)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
