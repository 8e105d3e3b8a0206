//! Insight records produced by the analysis stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::unit::{FormType, UnitKey};

/// Lowest and highest sentiment scores a record may carry.
pub const SENTIMENT_MIN: i64 = 1;
pub const SENTIMENT_MAX: i64 = 10;

/// Score used when nothing better is known.
pub const SENTIMENT_MIDPOINT: i64 = 5;

/// Number of macro concern slots on every record.
pub const MACRO_CONCERN_SLOTS: usize = 3;

/// Management's capital expenditure stance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CapexTone {
    Aggressive,
    #[default]
    Conservative,
    Reducing,
}

impl CapexTone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
            Self::Reducing => "reducing",
        }
    }

    /// Case-insensitive parse of the three allowed labels.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Some(Self::Aggressive),
            "conservative" => Some(Self::Conservative),
            "reducing" => Some(Self::Reducing),
            _ => None,
        }
    }
}

impl fmt::Display for CapexTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured signals extracted from one annual filing.
///
/// Identity fields are stamped from the request, never taken from the
/// model's echo of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightRecord {
    pub ticker: String,
    #[serde(rename = "year")]
    pub fiscal_year: i32,
    pub filing_type: FormType,
    pub ai_investment_focus: Option<String>,
    pub ai_monetization_status: Option<String>,
    pub capex_guidance_tone: CapexTone,
    pub china_exposure_risk: Option<String>,
    pub supply_chain_bottlenecks: Option<String>,
    pub restructuring_plans: Option<String>,
    pub efficiency_initiatives: Option<String>,
    pub mda_sentiment_score: i64,
    pub macro_concerns: [Option<String>; MACRO_CONCERN_SLOTS],
    pub growing_segments: Option<String>,
    pub shrinking_segments: Option<String>,
}

impl InsightRecord {
    /// The content-empty record used when extraction cannot succeed.
    pub fn null_skeleton(ticker: &str, fiscal_year: i32, filing_type: FormType) -> Self {
        Self {
            ticker: ticker.to_uppercase(),
            fiscal_year,
            filing_type,
            ai_investment_focus: None,
            ai_monetization_status: None,
            capex_guidance_tone: CapexTone::default(),
            china_exposure_risk: None,
            supply_chain_bottlenecks: None,
            restructuring_plans: None,
            efficiency_initiatives: None,
            mda_sentiment_score: SENTIMENT_MIDPOINT,
            macro_concerns: Default::default(),
            growing_segments: None,
            shrinking_segments: None,
        }
    }

    pub fn key(&self) -> UnitKey {
        UnitKey::new(self.ticker.clone(), self.fiscal_year)
    }
}

/// Where a stored record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Model identifier selected by the capability probe
    pub model: String,

    /// Untruncated MD&A length in characters (0 when absent)
    pub mda_chars: usize,

    /// Untruncated risk factors length in characters (0 when absent)
    pub risk_chars: usize,

    pub processed_at: DateTime<Utc>,
}

impl Provenance {
    pub fn new(model: impl Into<String>, mda_chars: usize, risk_chars: usize) -> Self {
        Self {
            model: model.into(),
            mda_chars,
            risk_chars,
            processed_at: Utc::now(),
        }
    }
}

/// An insight row as stored, with its tier and provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredInsight {
    pub tier: String,
    pub record: InsightRecord,
    pub provenance: Provenance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_skeleton_defaults() {
        let record = InsightRecord::null_skeleton("nvda", 2024, FormType::TenK);
        assert_eq!(record.ticker, "NVDA");
        assert_eq!(record.mda_sentiment_score, SENTIMENT_MIDPOINT);
        assert_eq!(record.capex_guidance_tone, CapexTone::Conservative);
        assert_eq!(record.macro_concerns, [None, None, None]);
        assert!(record.ai_investment_focus.is_none());
    }

    #[test]
    fn test_record_serializes_with_wire_names() {
        let record = InsightRecord::null_skeleton("TSM", 2023, FormType::TwentyF);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["year"], 2023);
        assert_eq!(json["filing_type"], "20-F");
        assert_eq!(json["capex_guidance_tone"], "conservative");
        assert_eq!(json["macro_concerns"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_capex_tone_parse_is_case_insensitive() {
        assert_eq!(CapexTone::parse(" Aggressive "), Some(CapexTone::Aggressive));
        assert_eq!(CapexTone::parse("REDUCING"), Some(CapexTone::Reducing));
        assert_eq!(CapexTone::parse("expanding"), None);
    }
}
