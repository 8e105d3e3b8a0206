//! Testing utilities including mock implementations.
//!
//! These are useful for exercising the pipeline without making real
//! network calls to EDGAR or the analysis service.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{AnalystError, AnalystResult, FetchError, FetchResult};
use crate::traits::{Analyst, FilingFetcher};
use crate::types::{UnitKey, WorkUnit};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A well-formed analyst response with every required field.
pub const VALID_RESPONSE: &str = r#"{
  "ticker": "ECHO",
  "year": 2000,
  "filing_type": "10-K",
  "ai_investment_focus": "Expanding accelerated computing capacity",
  "ai_monetization_status": "Early revenue from AI services",
  "capex_guidance_tone": "aggressive",
  "china_exposure_risk": "Export controls limit sales",
  "supply_chain_bottlenecks": null,
  "restructuring_plans": null,
  "efficiency_initiatives": "Operating expense discipline",
  "mda_sentiment_score": 7,
  "macro_concerns": ["interest rates", "tariffs"],
  "growing_segments": "Data Center",
  "shrinking_segments": null
}"#;

/// Record of a call made to the mock analyst.
#[derive(Debug, Clone)]
pub struct MockAnalystCall {
    pub model: String,
    /// Ticker named in the prompt, upper-cased
    pub ticker: Option<String>,
    pub prompt: String,
}

/// A mock analyst with scripted, deterministic responses.
///
/// Scripted responses for a ticker are consumed first; afterwards the
/// ticker's standing failure (if any) or [`VALID_RESPONSE`] is returned.
#[derive(Default)]
pub struct MockAnalyst {
    scripts: Mutex<HashMap<String, VecDeque<AnalystResult<String>>>>,
    failures: HashMap<String, AnalystError>,
    failure: Option<AnalystError>,
    unavailable_models: HashSet<String>,
    delay: Duration,
    calls: Mutex<Vec<MockAnalystCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockAnalyst {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for a ticker, returned in order.
    pub fn with_script(self, ticker: &str, responses: Vec<AnalystResult<String>>) -> Self {
        lock(&self.scripts)
            .entry(ticker.to_uppercase())
            .or_default()
            .extend(responses);
        self
    }

    /// Fail every call for one ticker with `err`.
    pub fn failing_for(mut self, ticker: &str, err: AnalystError) -> Self {
        self.failures.insert(ticker.to_uppercase(), err);
        self
    }

    /// Fail every call with `err`.
    pub fn always_failing(mut self, err: AnalystError) -> Self {
        self.failure = Some(err);
        self
    }

    /// Make the capability probe fail for `model`.
    pub fn with_unavailable_model(mut self, model: &str) -> Self {
        self.unavailable_models.insert(model.to_string());
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<MockAnalystCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of calls naming `ticker`.
    pub fn calls_for(&self, ticker: &str) -> usize {
        let ticker = ticker.to_uppercase();
        lock(&self.calls)
            .iter()
            .filter(|c| c.ticker.as_deref() == Some(ticker.as_str()))
            .count()
    }

    /// Highest number of concurrent `generate` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, ticker: Option<&str>) -> AnalystResult<String> {
        if let Some(ticker) = ticker {
            if let Some(next) = lock(&self.scripts).get_mut(ticker).and_then(VecDeque::pop_front) {
                return next;
            }
            if let Some(err) = self.failures.get(ticker) {
                return Err(err.clone());
            }
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(VALID_RESPONSE.to_string()),
        }
    }
}

fn prompt_ticker(prompt: &str) -> Option<String> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("COMPANY: "))
        .map(|t| t.trim().to_uppercase())
}

#[async_trait]
impl Analyst for MockAnalyst {
    async fn generate(&self, model: &str, _system: &str, prompt: &str) -> AnalystResult<String> {
        let ticker = prompt_ticker(prompt);
        lock(&self.calls).push(MockAnalystCall {
            model: model.to_string(),
            ticker: ticker.clone(),
            prompt: prompt.to_string(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.respond(ticker.as_deref())
    }

    async fn probe(&self, model: &str) -> AnalystResult<()> {
        if self.unavailable_models.contains(model) {
            Err(AnalystError::Unavailable(format!("{model} is not available")))
        } else {
            Ok(())
        }
    }
}

/// What the mock fetcher returns for a unit.
#[derive(Debug, Clone)]
pub enum MockFiling {
    /// Write this document and return its path
    Document(String),
    /// No filing exists
    Missing,
    /// Fail with a transport error
    Error(String),
}

/// A mock filing fetcher that writes documents into a directory.
pub struct MockFetcher {
    dir: PathBuf,
    filings: HashMap<UnitKey, MockFiling>,
    default: MockFiling,
    delay: Duration,
    fetched: Mutex<Vec<UnitKey>>,
}

impl MockFetcher {
    /// Every unit resolves to [`synthetic_filing`] unless overridden.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            filings: HashMap::new(),
            default: MockFiling::Document(synthetic_filing(
                "Revenue grew on machine learning and deep learning demand for generative AI.",
                "We depend on a concentrated supply chain.",
            )),
            delay: Duration::ZERO,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_filing(mut self, ticker: &str, fiscal_year: i32, filing: MockFiling) -> Self {
        self.filings.insert(UnitKey::new(ticker, fiscal_year), filing);
        self
    }

    pub fn with_default(mut self, filing: MockFiling) -> Self {
        self.default = filing;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Units fetched so far, in call order.
    pub fn fetched(&self) -> Vec<UnitKey> {
        lock(&self.fetched).clone()
    }
}

#[async_trait]
impl FilingFetcher for MockFetcher {
    async fn fetch(&self, unit: &WorkUnit) -> FetchResult<Option<PathBuf>> {
        let key = unit.key();
        lock(&self.fetched).push(key.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.filings.get(&key).unwrap_or(&self.default) {
            MockFiling::Document(content) => {
                let path = self
                    .dir
                    .join(format!("{}_{}.htm", unit.ticker, unit.fiscal_year));
                tokio::fs::write(&path, content).await?;
                Ok(Some(path))
            }
            MockFiling::Missing => Ok(None),
            MockFiling::Error(msg) => Err(FetchError::Http(msg.clone().into())),
        }
    }
}

/// Build an HTML filing whose Item 7 and Item 1A sections contain the
/// given bodies, preceded by a table of contents and padded so both
/// sections sit past the skipped leading region.
pub fn synthetic_filing(mda_body: &str, risk_body: &str) -> String {
    let filler = "<p>Lorem ipsum dolor sit amet, consectetur adipiscing elit.</p>".repeat(80);
    let padding = "<p>Additional disclosure text without headings.</p>".repeat(60);
    format!(
        "<html><body>\
         <p>TABLE OF CONTENTS</p><p>Item 1A. Risk Factors</p><p>Item 7. MD&amp;A</p>\
         {filler}\
         <p>Item 1A. Risk Factors</p><p>{risk_body}</p>{padding}\
         <p>Item 2. Properties</p><p>Leased offices.</p>\
         <p>Item 7. Management's Discussion and Analysis</p><p>{mda_body}</p>{padding}\
         <p>Item 7A. Quantitative and Qualitative Disclosures</p><p>Rates.</p>\
         <p>Item 8. Financial Statements</p>\
         {filler}\
         </body></html>"
    )
}
