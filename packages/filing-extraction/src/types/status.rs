//! Processing status recorded per work unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::unit::UnitKey;

/// Outcome recorded for a work unit.
///
/// `Pending` is implicit: a unit with no status row has never been attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// No filing could be resolved for the unit
    NoFiling,

    /// Filing fetched and sections extracted; waiting for analysis
    Parsed,

    /// Validated insight record stored
    Extracted,

    /// Fetch, parse, or analysis failed
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoFiling => "no_filing",
            Self::Parsed => "parsed",
            Self::Extracted => "extracted",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_filing" => Some(Self::NoFiling),
            "parsed" => Some(Self::Parsed),
            "extracted" => Some(Self::Extracted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the unit counts as done for resume purposes.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Extracted)
    }

    /// Whether this status ends the unit's attempt for the current run.
    ///
    /// Only terminal statuses bump the attempt counter, so each run adds
    /// exactly one attempt per unit it touched.
    pub fn ends_attempt(&self) -> bool {
        !matches!(self, Self::Parsed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status row as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub key: UnitKey,
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub last_attempt_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_label() {
        for status in [
            ProcessingStatus::NoFiling,
            ProcessingStatus::Parsed,
            ProcessingStatus::Extracted,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(ProcessingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProcessingStatus::parse("pending"), None);
    }

    #[test]
    fn test_only_extracted_is_done() {
        assert!(ProcessingStatus::Extracted.is_done());
        assert!(!ProcessingStatus::Failed.is_done());
        assert!(!ProcessingStatus::NoFiling.is_done());
        assert!(!ProcessingStatus::Parsed.is_done());
    }

    #[test]
    fn test_parsed_does_not_end_attempt() {
        assert!(!ProcessingStatus::Parsed.ends_attempt());
        assert!(ProcessingStatus::Failed.ends_attempt());
    }
}
