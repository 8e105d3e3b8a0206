//! Filing Insights Extraction Library
//!
//! A resumable, rate-limited, two-stage pipeline that turns annual
//! filings (10-K / 20-F) into structured sentiment records.
//!
//! # Pipeline
//!
//! - Enumerate (ticker, fiscal year) units not yet extracted
//! - Fetch each filing and pull out the MD&A and Risk Factors sections
//! - Hand parsed units to a bounded queue
//! - Ask the analyst for a structured record, retrying with backoff
//! - Upsert the record and its status, append it to the audit log
//!
//! Re-running after an interruption only processes what is still pending.
//!
//! # Usage
//!
//! ```rust,ignore
//! use filing_extraction::{InsightExtractor, Pipeline, RetryPolicy, SqliteStore, Universe};
//! use filing_extraction::testing::{MockAnalyst, MockFetcher};
//!
//! let store = Arc::new(SqliteStore::in_memory().await?);
//! let fetcher = Arc::new(MockFetcher::new(dir.path()));
//! let extractor = InsightExtractor::connect(Arc::new(MockAnalyst::new()), &models, RetryPolicy::default()).await?;
//!
//! let summary = Pipeline::new(store, fetcher, extractor).run(&universe).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Collaborator seams (Analyst, FilingFetcher, InsightStore)
//! - [`types`] - Units, statuses, records and configuration
//! - [`sections`] - HTML to text and section location
//! - [`pipeline`] - Resilient extraction and the stage coordinator
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`fetchers`] - EDGAR fetcher and the outbound rate gate
//! - [`report`] - Coverage gaps against the configured universe
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod fetchers;
pub mod pipeline;
pub mod report;
pub mod sections;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "gemini")]
pub mod ai;

// Re-export core types at crate root
pub use error::{AnalystError, FetchError, PipelineError, Result};
pub use traits::{Analyst, FilingFetcher, InsightStore};
pub use types::{
    CapexTone, FormType, InsightRecord, PipelineConfig, ProcessingStatus, Provenance,
    SectionLimits, SectionPair, StatusEntry, StoredInsight, TierTickers, UnitKey, Universe,
    WorkUnit,
};

// Re-export pipeline components
pub use pipeline::{
    enumerate_units, ExtractionOutcome, ExtractionRequest, InsightExtractor, Pipeline,
    RetryPolicy, RunSummary,
};
pub use report::{gap_report, render_gap_report, TickerGap};
pub use sections::SectionExtractor;

// Re-export stores
pub use stores::{AuditLog, MemoryStore};

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

// Re-export fetchers
pub use fetchers::{EdgarConfig, EdgarFetcher, RateGate, YearMatch};

#[cfg(feature = "gemini")]
pub use ai::GeminiAnalyst;
