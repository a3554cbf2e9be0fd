// src/pipeline/outcome.rs
use std::fmt;

use crate::broadcast::Topic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    NegativeKeyword(String),
    /// Resolution failed or returned nothing usable.
    UnresolvedIsin,
    InvalidIsin(String),
    Duplicate,
    /// Store already held the row although the cache did not know it.
    AlreadyStored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Download,
    Persist,
}

/// Terminal state of one announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Discarded(DiscardReason),
    Failed(FailureStage),
    Archived,
    Broadcast(Vec<Topic>),
}

impl Outcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Discarded(DiscardReason::NegativeKeyword(_)) => "discarded_keyword",
            Outcome::Discarded(DiscardReason::UnresolvedIsin) => "discarded_unresolved_isin",
            Outcome::Discarded(DiscardReason::InvalidIsin(_)) => "discarded_invalid_isin",
            Outcome::Discarded(DiscardReason::Duplicate) => "discarded_duplicate",
            Outcome::Discarded(DiscardReason::AlreadyStored) => "discarded_already_stored",
            Outcome::Failed(FailureStage::Download) => "failed_download",
            Outcome::Failed(FailureStage::Persist) => "failed_persist",
            Outcome::Archived => "archived",
            Outcome::Broadcast(_) => "broadcast",
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, Outcome::Archived | Outcome::Broadcast(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Outcome::Discarded(DiscardReason::Duplicate | DiscardReason::AlreadyStored)
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Discarded(DiscardReason::NegativeKeyword(k)) => {
                write!(f, "discarded, negative keyword {k:?}")
            }
            Outcome::Discarded(DiscardReason::UnresolvedIsin) => f.write_str("discarded, isin unresolved"),
            Outcome::Discarded(DiscardReason::InvalidIsin(i)) => write!(f, "discarded, invalid isin {i:?}"),
            Outcome::Discarded(DiscardReason::Duplicate) => f.write_str("discarded, duplicate"),
            Outcome::Discarded(DiscardReason::AlreadyStored) => f.write_str("discarded, already stored"),
            Outcome::Failed(stage) => write!(f, "failed at {stage:?}"),
            Outcome::Archived => f.write_str("archived"),
            Outcome::Broadcast(topics) => write!(f, "broadcast to {} topics", topics.len()),
        }
    }
}

/// What one poll tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    Backfilled { fetched: usize, persisted: usize },
    /// Feed empty or unreachable.
    Empty,
    /// Newest item equals the cursor.
    Unchanged,
    Processed(Outcome),
}
