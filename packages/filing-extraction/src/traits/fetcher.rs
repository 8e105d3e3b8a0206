//! Filing source.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::FetchResult;
use crate::types::WorkUnit;

/// Resolves a work unit to a locally readable filing document.
#[async_trait]
pub trait FilingFetcher: Send + Sync {
    /// Fetch the annual filing for `unit`.
    ///
    /// `Ok(None)` means no filing exists for the unit, which is a normal
    /// outcome (not yet listed, unknown ticker, not yet filed).
    async fn fetch(&self, unit: &WorkUnit) -> FetchResult<Option<PathBuf>>;
}
