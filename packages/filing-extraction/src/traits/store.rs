//! Durable storage for processing status and insight records.
//!
//! Two tables keyed by (ticker, fiscal year):
//! - the status log, the source of truth for resume
//! - the insight table, holding the latest record per unit
//!
//! plus an append-only audit log of every validated record.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::Result;
use crate::types::{
    InsightRecord, ProcessingStatus, Provenance, StatusEntry, StoredInsight, UnitKey,
};

/// Idempotent store behind the pipeline.
///
/// All writes are upserts, so replaying a unit never duplicates rows.
/// Errors are fatal to the run.
#[async_trait]
pub trait InsightStore: Send + Sync {
    /// Record the latest status for a unit, overwriting the previous one.
    ///
    /// The attempt counter grows by one for statuses that end an attempt
    /// (see [`ProcessingStatus::ends_attempt`]).
    async fn record_status(
        &self,
        key: &UnitKey,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Insert or fully replace the insight record for a unit.
    async fn upsert_insight(
        &self,
        tier: &str,
        record: &InsightRecord,
        provenance: &Provenance,
    ) -> Result<()>;

    /// Append a validated record to the audit log.
    async fn append_audit(&self, record: &InsightRecord) -> Result<()>;

    /// Units whose latest status is `extracted`.
    async fn done_set(&self) -> Result<HashSet<UnitKey>>;

    /// Latest status row for a unit.
    async fn status(&self, key: &UnitKey) -> Result<Option<StatusEntry>>;

    /// Stored insight for a unit.
    async fn insight(&self, key: &UnitKey) -> Result<Option<StoredInsight>>;

    /// Number of stored insight rows.
    async fn insight_count(&self) -> Result<usize>;
}
