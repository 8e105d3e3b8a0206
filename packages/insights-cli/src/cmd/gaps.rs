use anyhow::{Context, Result};
use filing_extraction::{gap_report, render_gap_report, InsightStore, SqliteStore};
use std::path::Path;

use crate::config::AppConfig;

pub async fn execute(config: &AppConfig, output: Option<&Path>) -> Result<()> {
    let store = SqliteStore::open(&config.paths.database)
        .await
        .with_context(|| format!("Failed to open {}", config.paths.database.display()))?;
    let done = store.done_set().await?;

    let gaps = gap_report(&config.universe, &done, &config.universe.exclude_from_report);
    let report = render_gap_report(&gaps);

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &report)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Gap report written");
        }
        None => print!("{report}"),
    }

    Ok(())
}
