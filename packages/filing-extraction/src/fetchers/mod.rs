//! Filing fetcher implementations.
//!
//! - `EdgarFetcher` - SEC EDGAR with a local document cache
//! - `RateGate` - concurrency cap and rate limit shared by outbound requests

pub mod edgar;
pub mod rate_limited;

pub use edgar::{EdgarConfig, EdgarFetcher, FilingIndex, FilingRef, YearMatch};
pub use rate_limited::{GatePermit, RateGate};
