use anyhow::{Context, Result};
use filing_extraction::{
    AuditLog, EdgarFetcher, GeminiAnalyst, InsightExtractor, Pipeline, RetryPolicy, RunSummary,
    SqliteStore,
};
use gemini_client::GeminiClient;
use std::sync::Arc;

use crate::config::{gemini_api_key, AppConfig};

pub async fn execute(config: &AppConfig) -> Result<()> {
    let mut client = GeminiClient::new(gemini_api_key()?);
    if let Some(url) = &config.gemini.base_url {
        client = client.with_base_url(url.clone());
    }
    let analyst = Arc::new(GeminiAnalyst::new(client));

    let extractor = InsightExtractor::connect(analyst, &config.gemini.models, RetryPolicy::default())
        .await
        .context("No Gemini model answered the probe")?;
    tracing::info!(model = %extractor.model(), "Using analysis model");

    let audit = AuditLog::open(&config.paths.audit_log)
        .await
        .with_context(|| format!("Failed to open {}", config.paths.audit_log.display()))?;
    let store = SqliteStore::open(&config.paths.database)
        .await
        .with_context(|| format!("Failed to open {}", config.paths.database.display()))?
        .with_audit_log(audit);

    let fetcher = EdgarFetcher::new(config.edgar.clone(), &config.paths.data_dir)
        .context("Failed to build EDGAR client")?;

    let summary = Pipeline::new(Arc::new(store), Arc::new(fetcher), extractor)
        .with_config(config.pipeline.clone())
        .run(&config.universe)
        .await
        .context("Pipeline run failed")?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Pending units:       {}", summary.pending);
    println!("Extracted:           {}", summary.extracted);
    println!("Fallback skeletons:  {}", summary.fallbacks);
    println!("No filing:           {}", summary.no_filing);
    println!("Fetch/parse failed:  {}", summary.parse_failures);
    println!("Peak hand-off depth: {}", summary.peak_handoff_depth);
    println!(
        "New extractions: {} | Total done: {}",
        summary.new_extractions(),
        summary.done_after
    );
}
