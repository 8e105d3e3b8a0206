//! Extraction pipeline: section hand-off, resilient analysis and the
//! two-stage coordinator.

pub mod coordinator;
pub mod extract;
pub mod prompts;

pub use coordinator::{enumerate_units, Pipeline, RunSummary};
pub use extract::{
    strip_fences, validate, ExtractionOutcome, ExtractionRequest, InsightExtractor, RetryPolicy,
};
