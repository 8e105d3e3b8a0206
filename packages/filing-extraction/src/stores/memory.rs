//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use crate::error::{PipelineError, Result};
use crate::traits::store::InsightStore;
use crate::types::{
    InsightRecord, ProcessingStatus, Provenance, StatusEntry, StoredInsight, UnitKey,
};

/// In-memory status log, insight table and audit log.
///
/// Useful for testing. Not suitable for production as data is lost on
/// restart.
#[derive(Default)]
pub struct MemoryStore {
    statuses: RwLock<HashMap<UnitKey, StatusEntry>>,
    insights: RwLock<HashMap<UnitKey, StoredInsight>>,
    audit: RwLock<Vec<InsightRecord>>,
}

fn poisoned<T>(_: PoisonError<T>) -> PipelineError {
    PipelineError::Storage("memory store lock poisoned".into())
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records appended to the audit log, in order.
    pub fn audit_records(&self) -> Result<Vec<InsightRecord>> {
        Ok(self.audit.read().map_err(poisoned)?.clone())
    }

    /// Every status row.
    pub fn statuses(&self) -> Result<Vec<StatusEntry>> {
        Ok(self.statuses.read().map_err(poisoned)?.values().cloned().collect())
    }
}

#[async_trait]
impl InsightStore for MemoryStore {
    async fn record_status(
        &self,
        key: &UnitKey,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let increment = u32::from(status.ends_attempt());
        let mut statuses = self.statuses.write().map_err(poisoned)?;
        let entry = statuses.entry(key.clone()).or_insert_with(|| StatusEntry {
            key: key.clone(),
            status,
            error_message: None,
            attempts: 0,
            last_attempt_at: Utc::now(),
        });
        entry.status = status;
        entry.error_message = error.map(str::to_string);
        entry.attempts += increment;
        entry.last_attempt_at = Utc::now();
        Ok(())
    }

    async fn upsert_insight(
        &self,
        tier: &str,
        record: &InsightRecord,
        provenance: &Provenance,
    ) -> Result<()> {
        self.insights.write().map_err(poisoned)?.insert(
            record.key(),
            StoredInsight {
                tier: tier.to_string(),
                record: record.clone(),
                provenance: provenance.clone(),
            },
        );
        Ok(())
    }

    async fn append_audit(&self, record: &InsightRecord) -> Result<()> {
        self.audit.write().map_err(poisoned)?.push(record.clone());
        Ok(())
    }

    async fn done_set(&self) -> Result<HashSet<UnitKey>> {
        Ok(self
            .statuses
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|e| e.status.is_done())
            .map(|e| e.key.clone())
            .collect())
    }

    async fn status(&self, key: &UnitKey) -> Result<Option<StatusEntry>> {
        Ok(self.statuses.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn insight(&self, key: &UnitKey) -> Result<Option<StoredInsight>> {
        Ok(self.insights.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn insight_count(&self) -> Result<usize> {
        Ok(self.insights.read().map_err(poisoned)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FormType;

    #[tokio::test]
    async fn test_status_last_write_wins_and_counts_attempts() {
        let store = MemoryStore::new();
        let key = UnitKey::new("NVDA", 2024);

        store
            .record_status(&key, ProcessingStatus::Parsed, None)
            .await
            .unwrap();
        store
            .record_status(&key, ProcessingStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let entry = store.status(&key).await.unwrap().unwrap();
        assert_eq!(entry.status, ProcessingStatus::Failed);
        assert_eq!(entry.error_message.as_deref(), Some("boom"));
        assert_eq!(entry.attempts, 1);
        assert!(store.done_set().await.unwrap().is_empty());

        store
            .record_status(&key, ProcessingStatus::Extracted, None)
            .await
            .unwrap();
        let entry = store.status(&key).await.unwrap().unwrap();
        assert_eq!(entry.attempts, 2);
        assert!(entry.error_message.is_none());
        assert!(store.done_set().await.unwrap().contains(&key));
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let store = MemoryStore::new();
        let mut record = InsightRecord::null_skeleton("AMD", 2023, FormType::TenK);
        let provenance = Provenance::new("model-a", 10, 20);

        store.upsert_insight("semis", &record, &provenance).await.unwrap();
        record.mda_sentiment_score = 8;
        store.upsert_insight("semis", &record, &provenance).await.unwrap();

        assert_eq!(store.insight_count().await.unwrap(), 1);
        let stored = store.insight(&record.key()).await.unwrap().unwrap();
        assert_eq!(stored.record.mda_sentiment_score, 8);
        assert_eq!(stored.tier, "semis");
    }
}
