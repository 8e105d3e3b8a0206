use anyhow::{Context, Result};
use filing_extraction::{EdgarConfig, PipelineConfig, Universe};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Models tried in order when no `[gemini]` section is configured.
const DEFAULT_MODELS: [&str; 3] = [
    "gemini-3-flash-preview",
    "gemini-2.5-flash",
    "gemini-2.0-flash-001",
];

/// Model selection for the analysis stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Candidates probed in order; the first that answers is used
    pub models: Vec<String>,
    pub base_url: Option<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            base_url: None,
        }
    }
}

/// Where data, the database and logs live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub database: PathBuf,
    pub audit_log: PathBuf,
    pub log_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/filings"),
            database: PathBuf::from("data/insights.db"),
            audit_log: PathBuf::from("data/insights.jsonl"),
            log_file: PathBuf::from("logs/pipeline.log"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Sections {
    pipeline: PipelineConfig,
    edgar: EdgarConfig,
    gemini: GeminiConfig,
    paths: PathsConfig,
}

/// Application configuration loaded from the TOML file.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub universe: Universe,
    pub pipeline: PipelineConfig,
    pub edgar: EdgarConfig,
    pub gemini: GeminiConfig,
    pub paths: PathsConfig,
}

impl AppConfig {
    /// Load and validate configuration from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let universe = Universe::from_toml_str(content)?;
        let sections: Sections = toml::from_str(content)?;
        sections.pipeline.validate()?;
        if sections.gemini.models.is_empty() {
            anyhow::bail!("[gemini] models must list at least one model");
        }

        let mut gemini = sections.gemini;
        if let Ok(url) = env::var("GEMINI_BASE_URL") {
            gemini.base_url = Some(url);
        }

        Ok(Self {
            universe,
            pipeline: sections.pipeline,
            edgar: sections.edgar,
            gemini,
            paths: sections.paths,
        })
    }
}

/// Read the Gemini API key from the environment (or `.env`).
pub fn gemini_api_key() -> Result<String> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();
    env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")
}

#[cfg(test)]
mod tests {
    use super::*;
    use filing_extraction::YearMatch;

    const FULL: &str = r#"
years = [2024, 2023]
foreign_filers = ["TSM"]
exclude_from_report = [2025]

[companies.mega_cap]
tickers = ["AAPL", "MSFT"]

[companies.semis]
tickers = ["TSM"]

[pipeline]
fetch_workers = 4

[edgar]
user_agent = "Research test@example.com"
year_match = "filing_window"

[edgar.cik_overrides]
XYZ = "0000000001"

[gemini]
models = ["gemini-2.5-flash"]

[paths]
database = "/tmp/insights.db"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::parse(FULL).unwrap();
        assert_eq!(config.universe.years, vec![2024, 2023]);
        assert_eq!(config.universe.companies.len(), 2);
        assert_eq!(config.pipeline.fetch_workers, 4);
        assert_eq!(config.pipeline.analysis_workers, 6);
        assert_eq!(config.edgar.user_agent, "Research test@example.com");
        assert_eq!(config.edgar.year_match, YearMatch::FilingWindow);
        assert_eq!(config.edgar.cik_overrides["XYZ"], "0000000001");
        assert_eq!(config.gemini.models, vec!["gemini-2.5-flash"]);
        assert_eq!(config.paths.database, PathBuf::from("/tmp/insights.db"));
        assert_eq!(config.paths.data_dir, PathBuf::from("data/filings"));
    }

    #[test]
    fn test_optional_sections_default() {
        let config = AppConfig::parse("years = [2024]\n[companies.t]\ntickers = [\"AAPL\"]\n").unwrap();
        assert_eq!(config.gemini.models.len(), 3);
        assert_eq!(config.pipeline.handoff_capacity, 30);
    }

    #[test]
    fn test_rejects_invalid_pipeline() {
        let content = "years = [2024]\n[companies.t]\ntickers = [\"AAPL\"]\n[pipeline]\nanalysis_workers = 0\n";
        assert!(AppConfig::parse(content).is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("stocks.toml");
        let err = AppConfig::load(&missing).unwrap_err();
        assert!(err.to_string().contains("stocks.toml"));
    }
}
