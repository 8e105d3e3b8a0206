//! SQLite storage implementation.
//!
//! Holds the processing log and the insight table in one database file.
//! Every write is a single upsert statement, so the pool can be shared by
//! all workers without explicit transactions.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::stores::audit::AuditLog;
use crate::traits::store::InsightStore;
use crate::types::{
    CapexTone, FormType, InsightRecord, ProcessingStatus, Provenance, StatusEntry, StoredInsight,
    UnitKey, MACRO_CONCERN_SLOTS,
};

fn storage_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Storage(e.to_string().into())
}

/// SQLite-backed insight store mirroring validated records to a JSONL
/// audit log.
///
/// Attach the log with [`SqliteStore::with_audit_log`] before running the
/// pipeline; appending without one is a storage error.
pub struct SqliteStore {
    pool: SqlitePool,
    audit: Option<AuditLog>,
}

impl SqliteStore {
    /// Open (or create) a database file, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        Self::with_pool(pool).await
    }

    /// Create a store from a connection URL (e.g. `sqlite://insights.db?mode=rwc`).
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url).map_err(storage_err)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        Self::with_pool(pool).await
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Every connection to `:memory:` is a separate database, so the pool
    /// holds exactly one connection for its whole lifetime.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool, audit: None };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Mirror validated records to `audit`. Required for `append_audit`.
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processing_log (
                ticker          TEXT NOT NULL,
                fiscal_year     INTEGER NOT NULL,
                status          TEXT NOT NULL,
                error_message   TEXT,
                attempts        INTEGER NOT NULL DEFAULT 0,
                last_attempt_at TEXT NOT NULL,
                PRIMARY KEY (ticker, fiscal_year)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS filing_insights (
                id                       INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker                   TEXT NOT NULL,
                tier                     TEXT NOT NULL,
                fiscal_year              INTEGER NOT NULL,
                filing_type              TEXT NOT NULL DEFAULT '10-K',
                processed_at             TEXT NOT NULL,
                ai_investment_focus      TEXT,
                ai_monetization_status   TEXT,
                capex_guidance_tone      TEXT NOT NULL,
                china_exposure_risk      TEXT,
                supply_chain_bottlenecks TEXT,
                restructuring_plans      TEXT,
                efficiency_initiatives   TEXT,
                mda_sentiment_score      INTEGER NOT NULL,
                macro_concerns           TEXT NOT NULL,
                growing_segments         TEXT,
                shrinking_segments       TEXT,
                mda_char_count           INTEGER NOT NULL DEFAULT 0,
                risk_char_count          INTEGER NOT NULL DEFAULT 0,
                extraction_model         TEXT NOT NULL,
                UNIQUE(ticker, fiscal_year)
            );

            CREATE INDEX IF NOT EXISTS idx_tier_year ON filing_insights(tier, fiscal_year);
            CREATE INDEX IF NOT EXISTS idx_sentiment ON filing_insights(mda_sentiment_score);
            CREATE INDEX IF NOT EXISTS idx_china_risk ON filing_insights(china_exposure_risk);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct StatusRow {
    ticker: String,
    fiscal_year: i64,
    status: String,
    error_message: Option<String>,
    attempts: i64,
    last_attempt_at: String,
}

impl StatusRow {
    fn into_entry(self) -> Result<StatusEntry> {
        let status = ProcessingStatus::parse(&self.status)
            .ok_or_else(|| storage_err(format!("Invalid status: {}", self.status)))?;
        let last_attempt_at = chrono::DateTime::parse_from_rfc3339(&self.last_attempt_at)
            .map_err(|e| storage_err(format!("Invalid date: {}", e)))?
            .with_timezone(&chrono::Utc);

        Ok(StatusEntry {
            key: UnitKey::new(self.ticker, self.fiscal_year as i32),
            status,
            error_message: self.error_message,
            attempts: self.attempts as u32,
            last_attempt_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct InsightRow {
    ticker: String,
    tier: String,
    fiscal_year: i64,
    filing_type: String,
    processed_at: String,
    ai_investment_focus: Option<String>,
    ai_monetization_status: Option<String>,
    capex_guidance_tone: String,
    china_exposure_risk: Option<String>,
    supply_chain_bottlenecks: Option<String>,
    restructuring_plans: Option<String>,
    efficiency_initiatives: Option<String>,
    mda_sentiment_score: i64,
    macro_concerns: String,
    growing_segments: Option<String>,
    shrinking_segments: Option<String>,
    mda_char_count: i64,
    risk_char_count: i64,
    extraction_model: String,
}

impl InsightRow {
    fn into_stored(self) -> Result<StoredInsight> {
        let filing_type = FormType::parse(&self.filing_type)
            .ok_or_else(|| storage_err(format!("Invalid filing type: {}", self.filing_type)))?;
        let capex_guidance_tone = CapexTone::parse(&self.capex_guidance_tone).unwrap_or_default();
        let macro_concerns: [Option<String>; MACRO_CONCERN_SLOTS] =
            serde_json::from_str(&self.macro_concerns)
                .map_err(|e| storage_err(format!("Invalid macro_concerns JSON: {}", e)))?;
        let processed_at = chrono::DateTime::parse_from_rfc3339(&self.processed_at)
            .map_err(|e| storage_err(format!("Invalid date: {}", e)))?
            .with_timezone(&chrono::Utc);

        Ok(StoredInsight {
            tier: self.tier,
            record: InsightRecord {
                ticker: self.ticker,
                fiscal_year: self.fiscal_year as i32,
                filing_type,
                ai_investment_focus: self.ai_investment_focus,
                ai_monetization_status: self.ai_monetization_status,
                capex_guidance_tone,
                china_exposure_risk: self.china_exposure_risk,
                supply_chain_bottlenecks: self.supply_chain_bottlenecks,
                restructuring_plans: self.restructuring_plans,
                efficiency_initiatives: self.efficiency_initiatives,
                mda_sentiment_score: self.mda_sentiment_score,
                macro_concerns,
                growing_segments: self.growing_segments,
                shrinking_segments: self.shrinking_segments,
            },
            provenance: Provenance {
                model: self.extraction_model,
                mda_chars: self.mda_char_count as usize,
                risk_chars: self.risk_char_count as usize,
                processed_at,
            },
        })
    }
}

#[async_trait]
impl InsightStore for SqliteStore {
    async fn record_status(
        &self,
        key: &UnitKey,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let increment: i64 = if status.ends_attempt() { 1 } else { 0 };

        sqlx::query(
            r#"
            INSERT INTO processing_log (ticker, fiscal_year, status, error_message, attempts, last_attempt_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticker, fiscal_year) DO UPDATE SET
                status = excluded.status,
                error_message = excluded.error_message,
                attempts = processing_log.attempts + excluded.attempts,
                last_attempt_at = excluded.last_attempt_at
            "#,
        )
        .bind(&key.ticker)
        .bind(key.fiscal_year)
        .bind(status.as_str())
        .bind(error)
        .bind(increment)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn upsert_insight(
        &self,
        tier: &str,
        record: &InsightRecord,
        provenance: &Provenance,
    ) -> Result<()> {
        let macro_concerns = serde_json::to_string(&record.macro_concerns).map_err(storage_err)?;

        sqlx::query(
            r#"
            INSERT INTO filing_insights (
                ticker, tier, fiscal_year, filing_type, processed_at,
                ai_investment_focus, ai_monetization_status, capex_guidance_tone,
                china_exposure_risk, supply_chain_bottlenecks,
                restructuring_plans, efficiency_initiatives,
                mda_sentiment_score, macro_concerns,
                growing_segments, shrinking_segments,
                mda_char_count, risk_char_count, extraction_model
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticker, fiscal_year) DO UPDATE SET
                tier                     = excluded.tier,
                filing_type              = excluded.filing_type,
                processed_at             = excluded.processed_at,
                ai_investment_focus      = excluded.ai_investment_focus,
                ai_monetization_status   = excluded.ai_monetization_status,
                capex_guidance_tone      = excluded.capex_guidance_tone,
                china_exposure_risk      = excluded.china_exposure_risk,
                supply_chain_bottlenecks = excluded.supply_chain_bottlenecks,
                restructuring_plans      = excluded.restructuring_plans,
                efficiency_initiatives   = excluded.efficiency_initiatives,
                mda_sentiment_score      = excluded.mda_sentiment_score,
                macro_concerns           = excluded.macro_concerns,
                growing_segments         = excluded.growing_segments,
                shrinking_segments       = excluded.shrinking_segments,
                mda_char_count           = excluded.mda_char_count,
                risk_char_count          = excluded.risk_char_count,
                extraction_model         = excluded.extraction_model
            "#,
        )
        .bind(&record.ticker)
        .bind(tier)
        .bind(record.fiscal_year)
        .bind(record.filing_type.as_str())
        .bind(provenance.processed_at.to_rfc3339())
        .bind(&record.ai_investment_focus)
        .bind(&record.ai_monetization_status)
        .bind(record.capex_guidance_tone.as_str())
        .bind(&record.china_exposure_risk)
        .bind(&record.supply_chain_bottlenecks)
        .bind(&record.restructuring_plans)
        .bind(&record.efficiency_initiatives)
        .bind(record.mda_sentiment_score)
        .bind(&macro_concerns)
        .bind(&record.growing_segments)
        .bind(&record.shrinking_segments)
        .bind(provenance.mda_chars as i64)
        .bind(provenance.risk_chars as i64)
        .bind(&provenance.model)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn append_audit(&self, record: &InsightRecord) -> Result<()> {
        match &self.audit {
            Some(audit) => audit.append(record).await,
            None => Err(storage_err(format!(
                "no audit log attached; cannot record {}",
                record.key()
            ))),
        }
    }

    async fn done_set(&self) -> Result<HashSet<UnitKey>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT ticker, fiscal_year FROM processing_log WHERE status = ?",
        )
        .bind(ProcessingStatus::Extracted.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|(ticker, year)| UnitKey::new(ticker, year as i32))
            .collect())
    }

    async fn status(&self, key: &UnitKey) -> Result<Option<StatusEntry>> {
        let row = sqlx::query_as::<_, StatusRow>(
            "SELECT ticker, fiscal_year, status, error_message, attempts, last_attempt_at FROM processing_log WHERE ticker = ? AND fiscal_year = ?",
        )
        .bind(&key.ticker)
        .bind(key.fiscal_year)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(StatusRow::into_entry).transpose()
    }

    async fn insight(&self, key: &UnitKey) -> Result<Option<StoredInsight>> {
        let row = sqlx::query_as::<_, InsightRow>(
            r#"
            SELECT ticker, tier, fiscal_year, filing_type, processed_at,
                   ai_investment_focus, ai_monetization_status, capex_guidance_tone,
                   china_exposure_risk, supply_chain_bottlenecks,
                   restructuring_plans, efficiency_initiatives,
                   mda_sentiment_score, macro_concerns,
                   growing_segments, shrinking_segments,
                   mda_char_count, risk_char_count, extraction_model
            FROM filing_insights WHERE ticker = ? AND fiscal_year = ?
            "#,
        )
        .bind(&key.ticker)
        .bind(key.fiscal_year)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(InsightRow::into_stored).transpose()
    }

    async fn insight_count(&self) -> Result<usize> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM filing_insights")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(count.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_attempts_only_count_terminal_statuses() {
        let store = test_store().await;
        let key = UnitKey::new("MSFT", 2024);

        store.record_status(&key, ProcessingStatus::Parsed, None).await.unwrap();
        let entry = store.status(&key).await.unwrap().unwrap();
        assert_eq!(entry.status, ProcessingStatus::Parsed);
        assert_eq!(entry.attempts, 0);

        store
            .record_status(&key, ProcessingStatus::Failed, Some("rate limited"))
            .await
            .unwrap();
        store.record_status(&key, ProcessingStatus::Parsed, None).await.unwrap();
        store.record_status(&key, ProcessingStatus::Extracted, None).await.unwrap();

        let entry = store.status(&key).await.unwrap().unwrap();
        assert_eq!(entry.status, ProcessingStatus::Extracted);
        assert_eq!(entry.attempts, 2);
        assert!(entry.error_message.is_none());
    }

    #[tokio::test]
    async fn test_done_set_only_extracted() {
        let store = test_store().await;
        store
            .record_status(&UnitKey::new("A", 2024), ProcessingStatus::Extracted, None)
            .await
            .unwrap();
        store
            .record_status(&UnitKey::new("B", 2024), ProcessingStatus::NoFiling, None)
            .await
            .unwrap();
        store
            .record_status(&UnitKey::new("C", 2024), ProcessingStatus::Failed, Some("x"))
            .await
            .unwrap();

        let done = store.done_set().await.unwrap();
        assert_eq!(done.len(), 1);
        assert!(done.contains(&UnitKey::new("A", 2024)));
    }

    #[tokio::test]
    async fn test_insight_round_trip_and_overwrite() {
        let store = test_store().await;
        let mut record = InsightRecord::null_skeleton("TSM", 2023, FormType::TwentyF);
        record.ai_investment_focus = Some("CoWoS capacity".into());
        record.macro_concerns = [Some("tariffs".into()), None, None];
        record.capex_guidance_tone = CapexTone::Aggressive;

        store
            .upsert_insight("semis", &record, &Provenance::new("model-a", 100, 50))
            .await
            .unwrap();

        let stored = store.insight(&record.key()).await.unwrap().unwrap();
        assert_eq!(stored.record, record);
        assert_eq!(stored.tier, "semis");
        assert_eq!(stored.provenance.mda_chars, 100);

        record.mda_sentiment_score = 9;
        store
            .upsert_insight("semis", &record, &Provenance::new("model-b", 1, 1))
            .await
            .unwrap();

        assert_eq!(store.insight_count().await.unwrap(), 1);
        let stored = store.insight(&record.key()).await.unwrap().unwrap();
        assert_eq!(stored.record.mda_sentiment_score, 9);
        assert_eq!(stored.provenance.model, "model-b");
    }

    #[tokio::test]
    async fn test_file_store_persists_and_mirrors_audit() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("data").join("insights.db");
        let jsonl = dir.path().join("data").join("insights.jsonl");
        let key = UnitKey::new("AAPL", 2022);

        {
            let store = SqliteStore::open(&db)
                .await
                .unwrap()
                .with_audit_log(AuditLog::open(&jsonl).await.unwrap());
            store.record_status(&key, ProcessingStatus::Extracted, None).await.unwrap();
            store
                .append_audit(&InsightRecord::null_skeleton("AAPL", 2022, FormType::TenK))
                .await
                .unwrap();
            store.pool().close().await;
        }

        let reopened = SqliteStore::open(&db).await.unwrap();
        assert!(reopened.done_set().await.unwrap().contains(&key));
        assert_eq!(AuditLog::read_all(&jsonl).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_without_audit_log_is_an_error() {
        let store = test_store().await;
        let record = InsightRecord::null_skeleton("AAPL", 2024, FormType::TenK);

        let err = store.append_audit(&record).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert!(err.to_string().contains("AAPL/2024"));
    }
}
