//! NEM Ingest - dispatch report ingestion tool

use clap::{Args, Parser, Subcommand};
use nem_common::logging::{init_logging, LogConfig, LogLevel};
use nem_ingest::config::{IngestConfig, RunOptions, WatermarkBackend};
use nem_ingest::discovery::CatalogScanner;
use nem_ingest::fetch::Fetcher;
use nem_ingest::ledger::{Ledger, PgLedgerStore};
use nem_ingest::pipeline::{exit_code_for_error, Pipeline, RunSummary};
use nem_ingest::registry::PgRawObjectRegistry;
use nem_ingest::storage::PgDispatchPriceRepository;
use nem_ingest::watermark::{FileWatermarkStore, PgWatermarkStore, WatermarkStore};
use nem_ingest::IngestError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "nem-ingest")]
#[command(author, version, about = "Incremental AEMO dispatch report ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download new report archives into the inbox
    Pull(RunArgs),
    /// Parse inbox files and upsert them into the database
    Process(RunArgs),
    /// Download, parse and upsert new archives in one run
    Ingest(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Maximum number of objects to handle this run
    #[arg(long, visible_alias = "max-files")]
    limit: Option<usize>,

    /// Show what would be handled without downloading or writing anything
    #[arg(long)]
    dry_run: bool,

    /// Report directory (DispatchIS_Reports or Dispatch_SCADA)
    #[arg(long, env = "AEMO_REPORT")]
    report: Option<String>,

    /// Only handle objects newer than this timestamp (YYYYMMDDHHMM)
    #[arg(long)]
    since: Option<String>,

    /// Only handle objects from the last N days
    #[arg(long, conflicts_with = "since")]
    backfill_days: Option<u32>,

    /// Leave the stage watermark untouched
    #[arg(long)]
    no_update_watermark: bool,

    /// Inbox directory
    #[arg(long, env = "RAW_DIR")]
    raw_dir: Option<PathBuf>,

    /// Delete inbox files after a fully successful run
    #[arg(long)]
    cleanup: bool,
}

impl Command {
    fn args(&self) -> &RunArgs {
        match self {
            Command::Pull(args) | Command::Process(args) | Command::Ingest(args) => args,
        }
    }

    fn needs_database(&self) -> bool {
        !matches!(self, Command::Pull(_))
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let base = LogConfig::default().with_file_prefix("nem-ingest");
    let log_config = apply_verbosity(
        LogConfig::from_env_with(base.clone()).unwrap_or(base),
        cli.verbose,
    );
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let code = match run(&cli).await {
        Ok(summary) => summary.exit_code(),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            exit_code_for_error(&e)
        },
    };
    process::exit(code);
}

/// `--verbose` wins over `LOG_LEVEL`
fn apply_verbosity(config: LogConfig, verbose: bool) -> LogConfig {
    if verbose {
        config.with_level(LogLevel::Debug)
    } else {
        config
    }
}

async fn run(cli: &Cli) -> nem_ingest::Result<RunSummary> {
    let config = IngestConfig::from_env()?;
    let args = cli.command.args();
    let options = RunOptions::resolve(
        &config,
        args.report.as_deref(),
        args.limit,
        args.dry_run,
        args.since.as_deref(),
        args.backfill_days,
        args.no_update_watermark,
        args.raw_dir.clone(),
        args.cleanup,
    )?;

    let pool = if cli.command.needs_database() {
        Some(connect(&config, config.require_database_url()?).await?)
    } else {
        match config.database_url.as_deref() {
            Some(url) => Some(connect(&config, url).await?),
            None => None,
        }
    };

    let watermarks: Arc<dyn WatermarkStore> = match (config.watermark_backend, pool.as_ref()) {
        (WatermarkBackend::Postgres, Some(pool)) => Arc::new(PgWatermarkStore::new(pool.clone())),
        (WatermarkBackend::Postgres, None) => {
            return Err(IngestError::Configuration(
                "WATERMARK_BACKEND=postgres requires DATABASE_URL".to_string(),
            ))
        },
        (WatermarkBackend::File, _) => Arc::new(FileWatermarkStore::new(config.watermark_file.clone())),
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let mut pipeline = Pipeline::new(
        config.base_url.clone(),
        CatalogScanner::new(&config.http)?,
        Fetcher::new(&config.http, config.retry_policy())?,
        watermarks,
    )
    .with_cancellation(cancel);

    if let Some(pool) = pool {
        pipeline = pipeline.with_repository(Arc::new(PgDispatchPriceRepository::with_batch_size(
            pool.clone(),
            config.upsert_batch_size,
        )));
        if config.metadata_enabled {
            pipeline = pipeline.with_ledger(Ledger::new(
                Some(Arc::new(PgLedgerStore::new(pool.clone()))),
                Some(Arc::new(PgRawObjectRegistry::new(pool))),
            ));
        } else {
            info!("Metadata tracking disabled");
        }
    }

    match cli.command {
        Command::Pull(_) => pipeline.pull(&options).await,
        Command::Process(_) => pipeline.process(&options).await,
        Command::Ingest(_) => pipeline.ingest(&options).await,
    }
}

async fn connect(config: &IngestConfig, url: &str) -> nem_ingest::Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Cancel the run on Ctrl-C; the pipeline stops before its next object
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping after the current object");
                cancel.cancel();
            },
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    });
}
