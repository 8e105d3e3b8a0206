//! Core types for the filing extraction pipeline.

pub mod config;
pub mod insight;
pub mod section;
pub mod status;
pub mod unit;

pub use config::{PipelineConfig, SectionLimits, TierTickers, Universe};
pub use insight::{
    CapexTone, InsightRecord, Provenance, StoredInsight, MACRO_CONCERN_SLOTS, SENTIMENT_MAX,
    SENTIMENT_MIDPOINT, SENTIMENT_MIN,
};
pub use section::SectionPair;
pub use status::{ProcessingStatus, StatusEntry};
pub use unit::{FormType, UnitKey, WorkUnit};
