//! Document classification: provider abstraction, response contract and throttling.
//!
//! A classifier receives a downloaded filing and returns free text that must carry a
//! `**Category:**` marker followed by `**Headline:**` and a structured narrative.
//! Anything that breaks that contract falls back to the default category upstream.

pub mod gemini;
pub mod rate_limit;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use thiserror::Error;

use crate::config::classifier::ClassifierConfig;

pub const CATEGORY_MARKER: &str = "**Category:**";
pub const HEADLINE_MARKER: &str = "**Headline:**";

/// Instruction sent alongside every document.
pub const PROMPT: &str = include_str!("prompt.txt");

/// Failure of one classification attempt.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier timed out")]
    Timeout,
    #[error("classifier transport error: {0}")]
    Transport(String),
    #[error("classifier returned HTTP {0}")]
    Status(u16),
    #[error("undecodable classifier response: {0}")]
    Decode(String),
    /// The document itself cannot be classified (too large, unreadable, disabled).
    #[error("document rejected: {0}")]
    Rejected(String),
    #[error("classifier returned no text")]
    Empty,
}

impl ClassifyError {
    /// Only timeouts, transport trouble, throttling, 5xx and garbled bodies are retried;
    /// every retry spends another rate-limiter slot.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClassifyError::Timeout | ClassifyError::Transport(_) | ClassifyError::Decode(_) => true,
            ClassifyError::Status(code) => *code == 429 || *code >= 500,
            ClassifyError::Rejected(_) | ClassifyError::Empty => false,
        }
    }
}

impl From<reqwest::Error> for ClassifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClassifyError::Timeout
        } else if let Some(status) = e.status() {
            ClassifyError::Status(status.as_u16())
        } else if e.is_decode() {
            ClassifyError::Decode(e.to_string())
        } else {
            ClassifyError::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait DocumentClassifier: Send + Sync {
    /// Raw model output for the document at `path`.
    async fn classify(&self, path: &Path) -> Result<String, ClassifyError>;

    fn name(&self) -> &'static str;

    /// Disabled classifiers let the pipeline skip downloads altogether.
    fn is_enabled(&self) -> bool {
        true
    }
}

pub type DynClassifier = Arc<dyn DocumentClassifier>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    pub narrative: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("classifier output has no category marker")]
    MissingCategoryMarker,
    #[error("classifier output has an empty category")]
    EmptyCategory,
}

/// Extract category and narrative from classifier output.
///
/// The narrative is the formatting-stripped text from the category marker onward; the
/// category is whatever sits between the category marker and the headline marker (or
/// the end of that line).
pub fn interpret(raw: &str) -> Result<Classification, ContractViolation> {
    let text = strip_markdown(raw);
    let start = text
        .find(CATEGORY_MARKER)
        .ok_or(ContractViolation::MissingCategoryMarker)?;
    let after = &text[start + CATEGORY_MARKER.len()..];
    let end = [after.find(HEADLINE_MARKER), after.find('\n')]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(after.len());
    let category = after[..end]
        .trim()
        .trim_matches(|c| matches!(c, '[' | ']' | '*' | '"'))
        .trim()
        .to_string();
    if category.is_empty() {
        return Err(ContractViolation::EmptyCategory);
    }
    let narrative = text[start..].trim().to_string();
    Ok(Classification {
        category,
        narrative: Some(narrative),
    })
}

/// Unwrap code fences, drop HTML tags and, when fences were present, pull indentation
/// back by half of the common indent.
pub fn strip_markdown(text: &str) -> String {
    static RE_FENCE: OnceCell<Regex> = OnceCell::new();
    static RE_TAG: OnceCell<Regex> = OnceCell::new();
    let re_fence =
        RE_FENCE.get_or_init(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("static regex"));
    let re_tag = RE_TAG.get_or_init(|| Regex::new(r"<[^>\n]*>").expect("static regex"));

    let had_fences = text.contains("```");
    let unfenced = re_fence.replace_all(text, "$1");
    let mut out = re_tag.replace_all(&unfenced, "").into_owned();

    if had_fences {
        let min_indent = out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.len() - l.trim_start().len())
            .min()
            .unwrap_or(0);
        if min_indent > 0 {
            let shift = (min_indent / 2).max(1);
            out = out
                .lines()
                .map(|l| if l.trim().is_empty() { l } else { l.get(shift..).unwrap_or(l) })
                .collect::<Vec<_>>()
                .join("\n");
        }
    }
    out.trim().to_string()
}

/// Used when classification is switched off.
pub struct DisabledClassifier;

#[async_trait]
impl DocumentClassifier for DisabledClassifier {
    async fn classify(&self, _path: &Path) -> Result<String, ClassifyError> {
        Err(ClassifyError::Rejected("classifier disabled".into()))
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
    fn is_enabled(&self) -> bool {
        false
    }
}

enum MockReply {
    Text(String),
    Transient,
    Final,
}

/// Deterministic classifier for tests and offline runs; counts invocations.
pub struct MockClassifier {
    reply: MockReply,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockClassifier {
    fn with_reply(reply: MockReply) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(reply: impl Into<String>) -> Self {
        Self::with_reply(MockReply::Text(reply.into()))
    }

    /// Fails every call with a retryable transport error.
    pub fn failing() -> Self {
        Self::with_reply(MockReply::Transient)
    }

    /// Refuses every document with a final error.
    pub fn rejecting() -> Self {
        Self::with_reply(MockReply::Final)
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentClassifier for MockClassifier {
    async fn classify(&self, path: &Path) -> Result<String, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !path.exists() {
            return Err(ClassifyError::Rejected(format!("document {} missing", path.display())));
        }
        match &self.reply {
            MockReply::Text(t) => Ok(t.clone()),
            MockReply::Transient => Err(ClassifyError::Transport("mock classifier failure".into())),
            MockReply::Final => Err(ClassifyError::Status(400)),
        }
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Factory following config and environment.
///
/// * `CLASSIFIER_TEST_MODE=mock` returns a mock with a fixed procedural answer.
/// * `enabled == false` returns [`DisabledClassifier`].
/// * Otherwise builds the configured provider.
pub fn build_classifier(cfg: &ClassifierConfig) -> anyhow::Result<DynClassifier> {
    if std::env::var("CLASSIFIER_TEST_MODE").is_ok_and(|v| v == "mock") {
        return Ok(Arc::new(MockClassifier::replying(format!(
            "{CATEGORY_MARKER} {}\n{HEADLINE_MARKER} Mock classification\n## Structured Narrative\nNot specified.",
            crate::ingest::types::DEFAULT_CATEGORY
        ))));
    }
    if !cfg.enabled {
        return Ok(Arc::new(DisabledClassifier));
    }
    match cfg.provider.as_str() {
        "gemini" => Ok(Arc::new(gemini::GeminiClassifier::from_config(cfg)?)),
        other => anyhow::bail!("unsupported classifier provider: {other}"),
    }
}
