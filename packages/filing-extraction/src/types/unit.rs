//! Work units: one (ticker, fiscal year) pair per extraction target.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a work unit, used as the key for every durable table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    pub ticker: String,
    pub fiscal_year: i32,
}

impl UnitKey {
    pub fn new(ticker: impl Into<String>, fiscal_year: i32) -> Self {
        Self {
            ticker: ticker.into(),
            fiscal_year,
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ticker, self.fiscal_year)
    }
}

/// Annual report form type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FormType {
    /// Domestic annual report
    #[default]
    #[serde(rename = "10-K")]
    TenK,

    /// Foreign private issuer annual report
    #[serde(rename = "20-F")]
    TwentyF,
}

impl FormType {
    /// Form type for a ticker given whether it is a foreign filer.
    pub fn for_filer(foreign: bool) -> Self {
        if foreign {
            Self::TwentyF
        } else {
            Self::TenK
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenK => "10-K",
            Self::TwentyF => "20-F",
        }
    }

    /// Parse the EDGAR form label ("10-K", "20-F").
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "10-K" => Some(Self::TenK),
            "20-F" => Some(Self::TwentyF),
            _ => None,
        }
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work enumerated for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub ticker: String,
    pub tier: String,
    pub fiscal_year: i32,
    pub form_type: FormType,
}

impl WorkUnit {
    pub fn new(
        ticker: impl Into<String>,
        tier: impl Into<String>,
        fiscal_year: i32,
        form_type: FormType,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            tier: tier.into(),
            fiscal_year,
            form_type,
        }
    }

    pub fn key(&self) -> UnitKey {
        UnitKey::new(self.ticker.clone(), self.fiscal_year)
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ticker, self.fiscal_year)
    }
}
