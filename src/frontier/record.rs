//! URL state definitions for tracking crawl progress
//!
//! Every canonical URL known to the frontier has exactly one `UrlRecord`,
//! and every record is in exactly one `UrlState`.

use crate::url::CanonicalUrl;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque arena index of a URL record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UrlId(pub u64);

impl fmt::Display for UrlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "url#{}", self.0)
    }
}

/// Represents the current crawl state of a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlState {
    // ===== Active States =====
    /// Known and eligible for dispatch
    Discovered,

    /// Selected by the dispatcher, lease not yet attached
    Queued,

    /// Held by exactly one worker under an active lease
    Leased,

    // ===== Terminal States =====
    /// Fetched and processed successfully
    Done,

    /// Gave up: robots denied or the attempt cap was exceeded
    Failed,
}

impl UrlState {
    /// Returns true if this is a terminal state (never dispatched again)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the URL may still be crawled
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Checks whether the frontier allows moving from `self` to `to`
    pub fn can_transition_to(&self, to: UrlState) -> bool {
        use UrlState::*;
        matches!(
            (self, to),
            (Discovered, Queued)
                | (Discovered, Failed)
                | (Queued, Leased)
                | (Queued, Discovered)
                | (Queued, Failed)
                | (Leased, Done)
                | (Leased, Failed)
                | (Leased, Discovered)
        )
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "queued" => Some(Self::Queued),
            "leased" => Some(Self::Leased),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible states
    pub fn all_states() -> [Self; 5] {
        [
            Self::Discovered,
            Self::Queued,
            Self::Leased,
            Self::Done,
            Self::Failed,
        ]
    }
}

impl fmt::Display for UrlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// A URL known to the frontier
#[derive(Debug, Clone)]
pub struct UrlRecord {
    pub id: UrlId,
    pub url: CanonicalUrl,
    pub state: UrlState,
    /// Link distance from the nearest seed
    pub depth: u32,
    /// Failed or expired attempts so far
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Most recent failure description, if any
    pub last_error: Option<String>,
    /// Position within its depth bucket while `Discovered`
    pub(crate) queue_seq: u64,
}

impl UrlRecord {
    pub fn domain(&self) -> &str {
        self.url.domain()
    }
}
