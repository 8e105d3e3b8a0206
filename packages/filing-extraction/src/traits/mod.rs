//! Trait seams between the pipeline and its collaborators.
//!
//! Applications plug in a filing source, an analysis service and a
//! durable store; the pipeline owns everything in between.

pub mod analyst;
pub mod fetcher;
pub mod store;

pub use analyst::{Analyst, PROBE_PROMPT};
pub use fetcher::FilingFetcher;
pub use store::InsightStore;
