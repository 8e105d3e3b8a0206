//! Filing insights CLI
//!
//! Runs the extraction pipeline over the configured universe and reports
//! coverage gaps.

mod cmd;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "insights")]
#[command(about = "Extract sentiment insights from annual filings")]
struct Cli {
    /// Path to the universe configuration
    #[arg(long, global = true, default_value = "stocks.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every pending (ticker, year) unit
    Run,

    /// Report configured units that are not yet extracted
    Gaps {
        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    init_logging(&config.paths.log_file)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd::run::execute(&config).await,
        Commands::Gaps { output } => cmd::gaps::execute(&config, output.as_deref()).await,
    }
}

/// Log to stdout and append to `log_file`.
fn init_logging(log_file: &Path) -> Result<()> {
    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,filing_extraction=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();

    Ok(())
}
