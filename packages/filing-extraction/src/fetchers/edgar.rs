//! SEC EDGAR filing fetcher.
//!
//! Resolution for a (ticker, fiscal year) unit:
//! 1. Return the cached document under `data_dir/<TICKER>/<YEAR>/filing.htm`
//!    if present and non-trivial.
//! 2. Map the ticker to a CIK (company ticker map, loaded once).
//! 3. Search the company's submissions index, then its paginated archive
//!    files, for the first annual report matching the fiscal year.
//! 4. Download the primary document into the cache.
//!
//! Every request passes through one [`RateGate`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{FetchError, FetchResult};
use crate::fetchers::rate_limited::RateGate;
use crate::traits::FilingFetcher;
use crate::types::{FormType, WorkUnit};

/// Cached documents at or below this size are treated as missing.
pub const MIN_CACHED_BYTES: u64 = 1024;

/// Tickers absent from (or renamed in) the company ticker map.
const BUILTIN_CIK_OVERRIDES: [(&str, &str); 4] = [
    ("SQ", "0001512673"),
    ("CYBR", "0001594805"),
    ("LTHM", "0001740967"),
    ("PARA", "0000813828"),
];

/// How a filing row is matched to a fiscal year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearMatch {
    /// The report period date starts with the fiscal year
    #[default]
    ReportDate,

    /// The filing date falls in the calendar year after the fiscal year
    FilingWindow,
}

/// EDGAR access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgarConfig {
    /// Sent on every request; EDGAR requires a contact address
    pub user_agent: String,
    pub requests_per_second: u32,
    pub max_concurrent: usize,
    pub year_match: YearMatch,

    /// Extra ticker -> 10-digit CIK entries, applied over the ticker map
    pub cik_overrides: BTreeMap<String, String>,

    pub timeout_secs: u64,
    pub submissions_base_url: String,
    pub ticker_map_url: String,
    pub archives_base_url: String,
}

impl Default for EdgarConfig {
    fn default() -> Self {
        Self {
            user_agent: "FinResearchBot contact@research.local".to_string(),
            requests_per_second: 8,
            max_concurrent: 8,
            year_match: YearMatch::default(),
            cik_overrides: BTreeMap::new(),
            timeout_secs: 60,
            submissions_base_url: "https://data.sec.gov".to_string(),
            ticker_map_url: "https://www.sec.gov/files/company_tickers.json".to_string(),
            archives_base_url: "https://www.sec.gov/Archives/edgar/data".to_string(),
        }
    }
}

/// One entry of the company ticker map.
#[derive(Debug, Deserialize)]
struct TickerEntry {
    cik_str: u64,
    ticker: String,
}

#[derive(Debug, Default, Deserialize)]
struct Submissions {
    #[serde(default)]
    filings: SubmissionFilings,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionFilings {
    #[serde(default)]
    recent: FilingIndex,
    #[serde(default)]
    files: Vec<ArchiveFile>,
}

#[derive(Debug, Deserialize)]
struct ArchiveFile {
    name: Option<String>,
}

/// Column-oriented filing table as served by the submissions API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilingIndex {
    #[serde(default)]
    pub form: Vec<String>,
    #[serde(default)]
    pub filing_date: Vec<String>,
    #[serde(default)]
    pub report_date: Vec<String>,
    #[serde(default)]
    pub accession_number: Vec<String>,
    #[serde(default)]
    pub primary_document: Vec<String>,
}

/// A located annual report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingRef {
    pub accession_number: String,
    pub primary_document: String,
}

impl FilingIndex {
    /// First annual report row matching the unit's form and fiscal year.
    pub fn find(&self, form_type: FormType, fiscal_year: i32, year_match: YearMatch) -> Option<FilingRef> {
        let wanted = form_type.as_str();
        let amended = format!("{wanted}/A");
        let accepted = |form: &str| {
            form == wanted
                || form == amended
                || matches!(form, "10-K" | "10-K/A" | "20-F" | "20-F/A")
        };

        let target = match year_match {
            YearMatch::ReportDate => fiscal_year.to_string(),
            YearMatch::FilingWindow => (fiscal_year + 1).to_string(),
        };

        for (i, form) in self.form.iter().enumerate() {
            if !accepted(form.as_str()) {
                continue;
            }
            let date = match year_match {
                YearMatch::ReportDate => self.report_date.get(i),
                YearMatch::FilingWindow => self.filing_date.get(i),
            };
            if !date.is_some_and(|d| d.starts_with(&target)) {
                continue;
            }
            let (Some(accession), Some(document)) =
                (self.accession_number.get(i), self.primary_document.get(i))
            else {
                continue;
            };
            return Some(FilingRef {
                accession_number: accession.clone(),
                primary_document: document.clone(),
            });
        }
        None
    }
}

fn http_err(e: reqwest::Error) -> FetchError {
    FetchError::Http(Box::new(e))
}

/// Filing fetcher backed by SEC EDGAR with a local document cache.
pub struct EdgarFetcher {
    client: reqwest::Client,
    gate: RateGate,
    config: EdgarConfig,
    data_dir: PathBuf,
    cik_map: OnceCell<HashMap<String, String>>,
}

impl EdgarFetcher {
    pub fn new(config: EdgarConfig, data_dir: impl Into<PathBuf>) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(http_err)?;

        Ok(Self {
            client,
            gate: RateGate::new(config.requests_per_second, config.max_concurrent),
            config,
            data_dir: data_dir.into(),
            cik_map: OnceCell::new(),
        })
    }

    /// Cache location for a unit's document.
    pub fn cache_path(&self, unit: &WorkUnit) -> PathBuf {
        self.data_dir
            .join(&unit.ticker)
            .join(unit.fiscal_year.to_string())
            .join("filing.htm")
    }

    async fn cached(path: &Path) -> Option<PathBuf> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() && meta.len() > MIN_CACHED_BYTES => Some(path.to_path_buf()),
            _ => None,
        }
    }

    /// Look up a ticker's zero-padded CIK, loading the map on first use.
    pub async fn cik(&self, ticker: &str) -> FetchResult<Option<String>> {
        let map = self
            .cik_map
            .get_or_try_init(|| self.load_cik_map())
            .await?;
        Ok(map.get(&ticker.to_uppercase()).cloned())
    }

    async fn load_cik_map(&self) -> FetchResult<HashMap<String, String>> {
        let entries: HashMap<String, TickerEntry> =
            self.get_json(&self.config.ticker_map_url).await?;

        let mut map: HashMap<String, String> = entries
            .into_values()
            .map(|e| (e.ticker.to_uppercase(), format!("{:010}", e.cik_str)))
            .collect();
        for (ticker, cik) in BUILTIN_CIK_OVERRIDES {
            map.insert(ticker.to_string(), cik.to_string());
        }
        for (ticker, cik) in &self.config.cik_overrides {
            map.insert(ticker.to_uppercase(), cik.clone());
        }

        info!(tickers = map.len(), "Loaded CIK map");
        Ok(map)
    }

    /// GET and decode JSON. Non-success statuses are `FetchError::Status`.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> FetchResult<T> {
        let _permit = self.gate.acquire().await;
        let response = self.client.get(url).send().await.map_err(http_err)?;

        let status = response.status();
        if !status.is_success() {
            debug!(url, status = status.as_u16(), "Non-success response");
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let value = response
            .json::<T>()
            .await
            .map_err(|e| FetchError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(value)
    }

    /// Locate the filing document URL for a unit.
    async fn filing_url(&self, cik: &str, unit: &WorkUnit) -> FetchResult<Option<String>> {
        let url = format!("{}/submissions/CIK{}.json", self.config.submissions_base_url, cik);
        let submissions: Submissions = self.get_json(&url).await?;

        let year_match = self.config.year_match;
        let found = match submissions
            .filings
            .recent
            .find(unit.form_type, unit.fiscal_year, year_match)
        {
            Some(found) => Some(found),
            None => {
                let mut found = None;
                for name in submissions.filings.files.iter().filter_map(|f| f.name.as_deref()) {
                    let page_url = format!("{}/submissions/{}", self.config.submissions_base_url, name);
                    let page: FilingIndex = match self.get_json(&page_url).await {
                        Ok(page) => page,
                        Err(FetchError::Status { status, .. }) => {
                            debug!(url = %page_url, status, "Skipping archive page");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    found = page.find(unit.form_type, unit.fiscal_year, year_match);
                    if found.is_some() {
                        break;
                    }
                }
                found
            }
        };

        let Some(filing) = found else {
            debug!(
                ticker = %unit.ticker,
                year = unit.fiscal_year,
                form = %unit.form_type,
                archive_pages = submissions.filings.files.len(),
                "No annual report in submissions"
            );
            return Ok(None);
        };

        let cik_int: u64 = cik.parse().map_err(|_| FetchError::InvalidResponse {
            url: self.config.ticker_map_url.clone(),
            reason: format!("malformed CIK {cik:?}"),
        })?;

        Ok(Some(format!(
            "{}/{}/{}/{}",
            self.config.archives_base_url,
            cik_int,
            filing.accession_number.replace('-', ""),
            filing.primary_document
        )))
    }
}

#[async_trait]
impl FilingFetcher for EdgarFetcher {
    async fn fetch(&self, unit: &WorkUnit) -> FetchResult<Option<PathBuf>> {
        let dest = self.cache_path(unit);
        if let Some(path) = Self::cached(&dest).await {
            debug!(ticker = %unit.ticker, year = unit.fiscal_year, "Cache hit");
            return Ok(Some(path));
        }

        let Some(cik) = self.cik(&unit.ticker).await? else {
            warn!(ticker = %unit.ticker, "CIK not found");
            return Ok(None);
        };

        let Some(url) = self.filing_url(&cik, unit).await? else {
            warn!(ticker = %unit.ticker, year = unit.fiscal_year, "Filing URL not found");
            return Ok(None);
        };

        let response = {
            let _permit = self.gate.acquire().await;
            self.client.get(&url).send().await.map_err(http_err)?
        };
        if response.status() != StatusCode::OK {
            warn!(
                ticker = %unit.ticker,
                year = unit.fiscal_year,
                status = response.status().as_u16(),
                url = %url,
                "Filing download failed"
            );
            return Ok(None);
        }
        let body = response.bytes().await.map_err(http_err)?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, &body).await?;
        info!(
            ticker = %unit.ticker,
            year = unit.fiscal_year,
            bytes = body.len(),
            "Downloaded filing"
        );

        Ok(Some(dest))
    }
}
