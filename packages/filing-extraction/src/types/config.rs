//! Configuration types for the ticker universe and the pipeline.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{PipelineError, Result};
use crate::types::unit::FormType;

/// Tickers listed under one tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierTickers {
    #[serde(default)]
    pub tickers: Vec<String>,
}

/// The configured ticker universe.
///
/// Tier order and ticker order follow the configuration file; a ticker
/// listed in more than one tier belongs to the first one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Universe {
    /// Target fiscal years
    pub years: Vec<i32>,

    /// Tier name -> tickers, in configuration order
    #[serde(default)]
    pub companies: IndexMap<String, TierTickers>,

    /// Tickers that file 20-F instead of 10-K
    #[serde(default)]
    pub foreign_filers: BTreeSet<String>,

    /// Earliest fiscal year with a filing, per ticker
    #[serde(default)]
    pub ipo_year_floor: HashMap<String, i32>,

    /// Years left out of the gap report (e.g. a year still being filed)
    #[serde(default)]
    pub exclude_from_report: Vec<i32>,
}

impl Universe {
    /// Parse a universe from TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let universe: Self = toml::from_str(s).map_err(|e| PipelineError::Config(e.to_string()))?;
        let universe = universe.normalized();
        universe.validate()?;
        Ok(universe)
    }

    /// Upper-case every ticker so all tables share one key per unit.
    pub fn normalized(self) -> Self {
        Self {
            companies: self
                .companies
                .into_iter()
                .map(|(tier, group)| {
                    let tickers = group.tickers.iter().map(|t| normalize_ticker(t)).collect();
                    (tier, TierTickers { tickers })
                })
                .collect(),
            foreign_filers: self.foreign_filers.iter().map(|t| normalize_ticker(t)).collect(),
            ipo_year_floor: self
                .ipo_year_floor
                .into_iter()
                .map(|(t, year)| (normalize_ticker(&t), year))
                .collect(),
            ..self
        }
    }

    /// Check that the universe can produce work.
    pub fn validate(&self) -> Result<()> {
        if self.years.is_empty() {
            return Err(PipelineError::Config("`years` must list at least one year".into()));
        }
        if self.companies.values().all(|t| t.tickers.is_empty()) {
            return Err(PipelineError::Config(
                "`companies` must define at least one tier with tickers".into(),
            ));
        }
        Ok(())
    }

    /// Builder-style helper to add a tier.
    pub fn with_tier(
        mut self,
        tier: impl Into<String>,
        tickers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.companies.insert(
            tier.into(),
            TierTickers {
                tickers: tickers
                    .into_iter()
                    .map(|t| {
                        let t: String = t.into();
                        normalize_ticker(&t)
                    })
                    .collect(),
            },
        );
        self
    }

    /// Builder-style helper to set the target years.
    pub fn with_years(mut self, years: impl IntoIterator<Item = i32>) -> Self {
        self.years = years.into_iter().collect();
        self
    }

    /// Builder-style helper to mark a foreign filer.
    pub fn with_foreign_filer(mut self, ticker: impl Into<String>) -> Self {
        let ticker: String = ticker.into();
        self.foreign_filers.insert(normalize_ticker(&ticker));
        self
    }

    /// Builder-style helper to set an IPO year floor.
    pub fn with_ipo_floor(mut self, ticker: impl Into<String>, year: i32) -> Self {
        let ticker: String = ticker.into();
        self.ipo_year_floor.insert(normalize_ticker(&ticker), year);
        self
    }

    /// (ticker, tier) pairs in configuration order, first tier wins.
    pub fn assignments(&self) -> Vec<(&str, &str)> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        for (tier, group) in &self.companies {
            for ticker in &group.tickers {
                if seen.insert(ticker.as_str()) {
                    out.push((ticker.as_str(), tier.as_str()));
                }
            }
        }
        out
    }

    /// Target years, most recent first.
    pub fn years_descending(&self) -> Vec<i32> {
        let mut years = self.years.clone();
        years.sort_unstable_by(|a, b| b.cmp(a));
        years.dedup();
        years
    }

    pub fn form_type(&self, ticker: &str) -> FormType {
        FormType::for_filer(self.foreign_filers.contains(ticker))
    }

    /// Whether a ticker could have filed for the given year.
    pub fn is_listed(&self, ticker: &str, fiscal_year: i32) -> bool {
        self.ipo_year_floor
            .get(ticker)
            .map_or(true, |floor| fiscal_year >= *floor)
    }
}

fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// Sizing for the two pipeline stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Workers in the fetch/parse stage
    pub fetch_workers: usize,

    /// Workers in the analysis stage
    pub analysis_workers: usize,

    /// Bound on parsed units waiting for analysis
    pub handoff_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_workers: 8,
            analysis_workers: 6,
            handoff_capacity: 30,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_workers(mut self, n: usize) -> Self {
        self.fetch_workers = n;
        self
    }

    pub fn with_analysis_workers(mut self, n: usize) -> Self {
        self.analysis_workers = n;
        self
    }

    pub fn with_handoff_capacity(mut self, n: usize) -> Self {
        self.handoff_capacity = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_workers == 0 || self.analysis_workers == 0 || self.handoff_capacity == 0 {
            return Err(PipelineError::Config(
                "worker counts and handoff_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Limits for section location and truncation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionLimits {
    /// Character budget for the MD&A section (~80k tokens)
    pub mda_max_chars: usize,

    /// Character budget for the risk factors section (~40k tokens)
    pub risk_max_chars: usize,

    /// Skip `chars / toc_skip_divisor` leading characters...
    pub toc_skip_divisor: usize,

    /// ...but never more than this many
    pub toc_skip_cap: usize,

    /// A start marker needs more trailing text than this to count as a
    /// real section heading rather than a table of contents entry
    pub min_trailing_chars: usize,
}

impl Default for SectionLimits {
    fn default() -> Self {
        Self {
            mda_max_chars: 280_000,
            risk_max_chars: 140_000,
            toc_skip_divisor: 7,
            toc_skip_cap: 50_000,
            min_trailing_chars: 2_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
years = [2022, 2024, 2023]
foreign_filers = ["TSM"]

[companies.semis]
tickers = ["NVDA", "TSM"]

[companies.mega_cap]
tickers = ["AAPL", "NVDA"]

[ipo_year_floor]
ARM = 2023
"#;

    #[test]
    fn test_parse_preserves_tier_order() {
        let universe = Universe::from_toml_str(SAMPLE).unwrap();
        let tiers: Vec<&String> = universe.companies.keys().collect();
        assert_eq!(tiers, vec!["semis", "mega_cap"]);
    }

    #[test]
    fn test_assignments_first_tier_wins() {
        let universe = Universe::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            universe.assignments(),
            vec![("NVDA", "semis"), ("TSM", "semis"), ("AAPL", "mega_cap")]
        );
    }

    #[test]
    fn test_years_descending() {
        let universe = Universe::from_toml_str(SAMPLE).unwrap();
        assert_eq!(universe.years_descending(), vec![2024, 2023, 2022]);
    }

    #[test]
    fn test_form_type_and_floor() {
        let universe = Universe::from_toml_str(SAMPLE).unwrap();
        assert_eq!(universe.form_type("TSM"), FormType::TwentyF);
        assert_eq!(universe.form_type("AAPL"), FormType::TenK);
        assert!(!universe.is_listed("ARM", 2022));
        assert!(universe.is_listed("ARM", 2023));
        assert!(universe.is_listed("AAPL", 1990));
    }

    #[test]
    fn test_tickers_are_upper_cased() {
        let universe = Universe::from_toml_str(
            "years = [2024]\nforeign_filers = [\"tsm\"]\n[companies.semis]\ntickers = [\" nvda\", \"tsm\"]\n[ipo_year_floor]\narm = 2023\n",
        )
        .unwrap();
        assert_eq!(universe.assignments(), vec![("NVDA", "semis"), ("TSM", "semis")]);
        assert_eq!(universe.form_type("TSM"), FormType::TwentyF);
        assert!(!universe.is_listed("ARM", 2022));

        let built = Universe::default()
            .with_years([2024])
            .with_tier("mega_cap", ["aapl"])
            .with_foreign_filer("asml")
            .with_ipo_floor("arm", 2023);
        assert_eq!(built.assignments(), vec![("AAPL", "mega_cap")]);
        assert!(built.foreign_filers.contains("ASML"));
        assert_eq!(built.ipo_year_floor.get("ARM"), Some(&2023));
    }

    #[test]
    fn test_empty_universe_rejected() {
        assert!(Universe::from_toml_str("years = []").is_err());
        assert!(Universe::from_toml_str("years = [2024]").is_err());
    }

    #[test]
    fn test_pipeline_config_validation() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert!(PipelineConfig::default()
            .with_analysis_workers(0)
            .validate()
            .is_err());
    }
}
