//! Append-only JSONL audit log of validated insight records.

use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::types::InsightRecord;

/// One JSON object per line, opened in append mode and never rewritten.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    /// Open (or create) the log at `path`, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub async fn append(&self, record: &InsightRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every record in the log at `path`.
    pub async fn read_all(path: impl AsRef<Path>) -> Result<Vec<InsightRecord>> {
        let content = fs::read_to_string(path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FormType;

    #[tokio::test]
    async fn test_append_only_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("insights.jsonl");

        let log = AuditLog::open(&path).await.unwrap();
        log.append(&InsightRecord::null_skeleton("AAPL", 2024, FormType::TenK))
            .await
            .unwrap();
        drop(log);

        let log = AuditLog::open(&path).await.unwrap();
        log.append(&InsightRecord::null_skeleton("AAPL", 2024, FormType::TenK))
            .await
            .unwrap();

        let records = AuditLog::read_all(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ticker, "AAPL");
    }
}
