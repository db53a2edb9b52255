//! PNCP-Ingest main entry point
//!
//! This is the command-line interface for the PNCP procurement ingester.

use chrono::Local;
use clap::Parser;
use pncp_ingest::config::{load_config_with_hash, Config};
use pncp_ingest::crawler::{probe_window, Coordinator, IngestMode, IngestRequest};
use pncp_ingest::model::{parse_window_point, IngestionWindow, Modality, TimeBounds, WindowPoint};
use pncp_ingest::registry::HttpRegistryClient;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// PNCP-Ingest: incremental procurement ingestion
///
/// Pulls procurement records updated within a date window from the PNCP
/// registry into a local SQLite database, keeping only the newest copy of
/// each record.
#[derive(Parser, Debug)]
#[command(name = "pncp-ingest")]
#[command(version)]
#[command(about = "Incremental PNCP procurement ingester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// First day (YYYYMMDD or YYYY-MM-DD) or instant (YYYY-MM-DDTHH:MM:SS); defaults to today
    #[arg(long)]
    start: Option<String>,

    /// Last day or instant; defaults to --start
    #[arg(long)]
    end: Option<String>,

    /// How to walk the feed
    #[arg(long, default_value_t = IngestMode::Scan)]
    mode: IngestMode,

    /// Modality code (1-13); defaults to the configured one
    #[arg(long)]
    modality: Option<i64>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show how much would be ingested without persisting anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.stats {
        return handle_stats(&config);
    }

    let modality = match cli.modality {
        Some(code) => Modality::from_code(code)?,
        None => config.registry.modality()?,
    };
    let request = build_request(&cli, modality)?;

    if cli.dry_run {
        handle_dry_run(&config, &request).await
    } else {
        handle_ingest(config, config_hash, &request).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("pncp_ingest=info,warn"),
            1 => EnvFilter::new("pncp_ingest=debug,info"),
            2 => EnvFilter::new("pncp_ingest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Turns `--start`/`--end` into a request
///
/// Whole days map to a window; any exact instant narrows the run to those
/// bounds.
fn build_request(
    cli: &Cli,
    modality: Modality,
) -> Result<IngestRequest, Box<dyn std::error::Error>> {
    let start = match &cli.start {
        Some(value) => parse_window_point(value)?,
        None => WindowPoint::Day(Local::now().date_naive()),
    };
    let end = match &cli.end {
        Some(value) => parse_window_point(value)?,
        None => start,
    };

    let request = match (start, end) {
        (WindowPoint::Day(first), WindowPoint::Day(last)) => {
            IngestRequest::new(cli.mode, modality, IngestionWindow::new(first, last)?)
        }
        _ => {
            let bounds = TimeBounds::new(start.as_start(), end.as_end())?;
            IngestRequest::with_bounds(cli.mode, modality, bounds)
        }
    };
    Ok(request)
}

/// Handles the --dry-run mode: probes page 1 and shows what would be ingested
async fn handle_dry_run(
    config: &Config,
    request: &IngestRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== PNCP-Ingest Dry Run ===\n");

    println!("Registry:");
    println!("  Feed: {}", config.registry.consulta_url);
    println!("  Items: {}", config.registry.pncp_url);
    println!("  Page size: {}", config.registry.page_size);
    println!("  Timeout: {}s", config.registry.timeout_secs);

    println!("\nCrawler:");
    println!("  Max concurrent pages: {}", config.crawler.max_concurrent_pages);
    println!("  Cooldown: {}s", config.crawler.cooldown_secs);
    println!("  Max page retries: {}", config.crawler.max_page_retries);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Flush every: {} records", config.output.flush_every);

    println!("\nRequest:");
    println!("  Mode: {}", request.mode);
    println!("  Modality: {:?} ({})", request.modality, request.modality.code());
    println!("  Window: {}", request.window);
    println!("  Bounds: {} .. {}", request.bounds.start, request.bounds.end);

    // Talk to the registry only; opening storage would create the database.
    let client = HttpRegistryClient::new(&config.registry, &config.retry)?;
    let page_size = config.registry.page_size()?;
    let page = probe_window(&client, request.window, request.modality, page_size).await?;

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Window has {} records across {} pages",
        page.total_records, page.total_pages
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use pncp_ingest::output::{load_statistics, print_statistics};
    use pncp_ingest::storage::open_storage;
    use std::path::Path;

    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main ingestion run
async fn handle_ingest(
    config: Config,
    config_hash: String,
    request: &IngestRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut coordinator = Coordinator::from_config(config, config_hash)?;

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let report = coordinator.run(request).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.success {
        Ok(())
    } else {
        Err(report.message.into())
    }
}
