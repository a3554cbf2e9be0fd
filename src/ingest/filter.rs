// src/ingest/filter.rs
use serde::{Deserialize, Serialize};

/// Headline keywords that mark routine filings nobody wants pushed.
pub const DEFAULT_NEGATIVE_KEYWORDS: &[&str] = &[
    "Trading Window",
    "Compliance Report",
    "Advertisement",
    "Public Announcement",
    "Share Certificate",
    "Depositories and Participants",
    "Depository and Participant",
    "74(5)",
    "XBRL",
    "Newspaper Publication",
    "Published in the Newspapers",
    "Clippings",
    "Book Closure",
    "Change in Company Secretary/Compliance Officer",
    "Record Date",
];

/// Keywords that keep a headline even when a negative keyword also matches.
pub const DEFAULT_SPECIAL_KEYWORDS: &[&str] = &["Board", "Outcome", "General Updates"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordPolicy {
    #[serde(default)]
    pub negative: Vec<String>,
    #[serde(default)]
    pub special: Vec<String>,
}

impl Default for KeywordPolicy {
    fn default() -> Self {
        Self {
            negative: DEFAULT_NEGATIVE_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            special: DEFAULT_SPECIAL_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Why a headline was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    pub keyword: String,
}

impl KeywordPolicy {
    pub fn new(negative: Vec<String>, special: Vec<String>) -> Self {
        Self { negative, special }
    }

    /// `Some(match)` when the headline should be dropped.
    pub fn rejects(&self, headline: &str) -> Option<KeywordMatch> {
        let h = headline.to_lowercase();
        if self.special.iter().any(|k| contains_keyword(&h, k)) {
            return None;
        }
        self.negative
            .iter()
            .find(|k| contains_keyword(&h, k))
            .map(|k| KeywordMatch { keyword: k.clone() })
    }

    pub fn accepts(&self, headline: &str) -> bool {
        self.rejects(headline).is_none()
    }
}

fn contains_keyword(lower_headline: &str, keyword: &str) -> bool {
    let k = keyword.trim();
    !k.is_empty() && lower_headline.contains(&k.to_lowercase())
}
