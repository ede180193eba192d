//! NFT Transfer Backfill CLI
//!
//! Backfills ERC721/ERC1155 transfer activity into MongoDB, one UTC day per
//! collection, with per-day checkpoints.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use nft_backfill::checkpoint::DayStatus;
use nft_backfill::config::IndexerConfig;
use nft_backfill::dater::BlockDater;
use nft_backfill::driver::{days_to_process, DailyDriver, DayOutcome};
use nft_backfill::mongo::MongoStore;
use nft_backfill::rpc::EthRpcClient;
use nft_backfill::store::{DocumentStore, MemoryStore};

#[derive(Parser)]
#[command(name = "nft-backfill")]
#[command(version)]
#[command(about = "Checkpointed ERC721/ERC1155 transfer backfill into MongoDB", long_about = None)]
struct Cli {
    /// Path to configuration file (optional, uses env vars if not provided)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill a window of days
    Run {
        /// First UTC day (YYYY-MM-DD), overrides window.start_date
        #[arg(short, long)]
        start_date: Option<NaiveDate>,

        /// Number of days to process
        #[arg(short, long)]
        days: Option<u32>,

        /// Days between processed days, negative to walk backward
        #[arg(long, allow_negative_numbers = true)]
        step: Option<i64>,

        /// Chunks processed concurrently within a day
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write into process memory instead of MongoDB
        #[arg(long)]
        dry_run: bool,
    },

    /// Show checkpoint status for the configured window
    Status {
        /// First UTC day (YYYY-MM-DD), overrides window.start_date
        #[arg(short, long)]
        start_date: Option<NaiveDate>,

        /// Number of days to inspect
        #[arg(short, long)]
        days: Option<u32>,

        /// Days between inspected days, negative to walk backward
        #[arg(long, allow_negative_numbers = true)]
        step: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => IndexerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => IndexerConfig::load().context("Failed to load config from environment")?,
    };

    match cli.command {
        Commands::Run {
            start_date,
            days,
            step,
            concurrency,
            dry_run,
        } => {
            apply_window_overrides(&mut config, start_date, days, step);
            if let Some(concurrency) = concurrency {
                config.scan.concurrency = concurrency;
            }
            config.validate()?;

            if dry_run {
                warn!("Dry run: records are kept in memory and discarded on exit");
                cmd_run(&config, Arc::new(MemoryStore::new())).await?;
            } else {
                let store = MongoStore::connect(&config.store)
                    .await
                    .context("Failed to connect to MongoDB")?;
                cmd_run(&config, Arc::new(store)).await?;
            }
        }
        Commands::Status {
            start_date,
            days,
            step,
        } => {
            apply_window_overrides(&mut config, start_date, days, step);
            config.validate()?;
            cmd_status(&config).await?;
        }
    }

    Ok(())
}

fn apply_window_overrides(
    config: &mut IndexerConfig,
    start_date: Option<NaiveDate>,
    days: Option<u32>,
    step: Option<i64>,
) {
    if let Some(start_date) = start_date {
        config.window.start_date = start_date;
    }
    if let Some(days) = days {
        config.window.day_count = days;
    }
    if let Some(step) = step {
        config.window.day_step = step;
    }
}

fn connect_chain(config: &IndexerConfig) -> Result<Arc<EthRpcClient>> {
    let chain = EthRpcClient::new(config.rpc.clone()).context("Failed to build RPC client")?;
    Ok(Arc::new(chain))
}

async fn cmd_run<S: DocumentStore>(config: &IndexerConfig, store: Arc<S>) -> Result<()> {
    info!("=== NFT Transfer Backfill ===");
    let window = &config.window;
    let days = days_to_process(window.start_date, window.day_count, window.day_step);
    info!(
        "Window: {} days from {} every {} day(s)",
        days.len(),
        window.start_date,
        window.day_step
    );
    info!(
        "Scan: chunk_size={}, concurrency={}, batch_threshold={}",
        config.scan.chunk_size, config.scan.concurrency, config.scan.batch_threshold
    );

    let chain = connect_chain(config)?;
    let dater = Arc::new(BlockDater::new(chain.clone()));
    let driver = DailyDriver::new(
        chain,
        store,
        dater,
        config.scan.clone(),
        Duration::from_millis(config.rpc.reconnect_settle_ms),
    );

    let reports = driver.run(&days).await.context("Backfill aborted")?;

    info!("=== Backfill Complete ===");
    for report in &reports {
        match &report.outcome {
            DayOutcome::Skipped => info!("  {} {}: already complete", "-", report.day.collection()),
            DayOutcome::Processed(summary) => info!(
                "  {} {}: {} events ({} malformed) into {} records ({} new, {} merged), {} flushes",
                "✓",
                report.day.collection(),
                summary.events.total(),
                summary.malformed,
                summary.records,
                summary.writes.upserted,
                summary.writes.modified,
                summary.flushes
            ),
        }
    }

    Ok(())
}

async fn cmd_status(config: &IndexerConfig) -> Result<()> {
    info!("=== Backfill Status ===");
    let window = &config.window;
    let days = days_to_process(window.start_date, window.day_count, window.day_step);

    let chain = connect_chain(config)?;
    let store = MongoStore::connect(&config.store)
        .await
        .context("Failed to connect to MongoDB")?;
    let dater = Arc::new(BlockDater::new(chain.clone()));
    let driver = DailyDriver::new(
        chain,
        Arc::new(store),
        dater,
        config.scan.clone(),
        Duration::ZERO,
    );

    let statuses = driver.status(&days).await.context("Failed to read checkpoints")?;
    for (day, status) in statuses {
        let mark = match status {
            DayStatus::Complete => "✓",
            DayStatus::Partial(_) => "~",
            DayStatus::Unseen => "✗",
        };
        info!(
            "  {} {} (blocks {}-{}): {}",
            mark,
            day.collection(),
            day.start_block,
            day.end_block,
            status
        );
    }

    Ok(())
}
