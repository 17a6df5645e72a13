//! Listing-Harvest main entry point
//!
//! This is the command-line interface for the Listing-Harvest crawler.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use listing_harvest::config::{load_config_with_hash, validate, Config, FetchStrategyKind};
use listing_harvest::crawler::{crawl, CrawlSummary};
use listing_harvest::output::{
    generate_markdown_report, load_statistics, print_statistics, print_summary,
};
use listing_harvest::storage::{open_storage, DiscoveryCache};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Listing-Harvest: a resilient two-phase listing site crawler
///
/// Walks the paginated listing views of a collection to discover item URLs,
/// then fetches every discovered item and stores a structured record for it.
/// Interrupted runs resume from the discovery cache.
#[derive(Parser, Debug)]
#[command(name = "listing-harvest")]
#[command(version)]
#[command(about = "A resilient two-phase listing site crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Collection to crawl (overrides crawl.collection-key)
    #[arg(long, value_name = "KEY")]
    collection: Option<String>,

    /// Number of listing pages to discover
    #[arg(long, value_name = "N")]
    max_pages: Option<u32>,

    /// Maximum number of items to extract in this run
    #[arg(long, value_name = "N")]
    max_items: Option<u32>,

    /// Download the images of every stored record
    #[arg(long, conflicts_with = "no_images")]
    images: bool,

    /// Do not download images
    #[arg(long, conflicts_with = "images")]
    no_images: bool,

    /// Listing page to start discovery from, instead of the computed resume point
    #[arg(long, value_name = "N")]
    start_page: Option<u32>,

    /// Item fetch strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Write a markdown report of the run to this path
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the crawl plan without crawling
    #[arg(long, conflicts_with_all = ["stats", "clear_cache"])]
    dry_run: bool,

    /// Show discovery cache and session statistics and exit
    #[arg(long, conflicts_with_all = ["dry_run", "clear_cache"])]
    stats: bool,

    /// Delete the cached URLs of the collection and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    clear_cache: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Pooled,
    Isolated,
}

impl From<StrategyArg> for FetchStrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Pooled => FetchStrategyKind::Pooled,
            StrategyArg::Isolated => FetchStrategyKind::Isolated,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    apply_overrides(&mut config, &cli);
    validate(&config).context("invalid command-line override")?;

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(ExitCode::SUCCESS)
    } else if cli.stats {
        handle_stats(&config)?;
        Ok(ExitCode::SUCCESS)
    } else if cli.clear_cache {
        handle_clear_cache(&config)?;
        Ok(ExitCode::SUCCESS)
    } else {
        let summary = handle_crawl(config.clone(), &config_hash).await?;
        if let Some(path) = &cli.report {
            write_report(&config, &summary, path)?;
        }
        let code = summary.status.exit_code();
        Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("listing_harvest=info,warn"),
            1 => EnvFilter::new("listing_harvest=debug,info"),
            2 => EnvFilter::new("listing_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Applies command-line overrides on top of the loaded file
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(collection) = &cli.collection {
        config.crawl.collection_key = collection.clone();
    }
    if let Some(max_pages) = cli.max_pages {
        config.crawl.max_pages = max_pages;
    }
    if let Some(max_items) = cli.max_items {
        config.crawl.max_items = Some(max_items);
    }
    if cli.images {
        config.crawl.download_images = true;
    }
    if cli.no_images {
        config.crawl.download_images = false;
    }
    if let Some(start_page) = cli.start_page {
        config.crawl.start_page = Some(start_page);
    }
    if let Some(strategy) = cli.strategy {
        config.fetch.strategy = strategy.into();
    }
}

/// Handles the --dry-run mode: validates config and shows the crawl plan
fn handle_dry_run(config: &Config) {
    println!("=== Listing-Harvest Dry Run ===\n");

    println!("Target:");
    println!("  Base URL: {}", config.target.base_url);
    println!("  Listing path: {}", config.target.listing_path);
    println!("  Items per page: {}", config.target.items_per_page);

    println!("\nCrawl:");
    println!("  Collection: {}", config.crawl.collection_key);
    println!("  Max pages: {}", config.crawl.max_pages);
    match config.crawl.max_items {
        Some(max) => println!("  Max items: {}", max),
        None => println!("  Max items: unlimited"),
    }
    match config.crawl.start_page {
        Some(page) => println!("  Start page: {}", page),
        None => println!("  Start page: computed from stored records"),
    }
    println!("  Download images: {}", config.crawl.download_images);

    println!("\nFetch:");
    println!("  Strategy: {}", config.fetch.strategy);
    match config.fetch.strategy {
        FetchStrategyKind::Pooled => {
            println!(
                "  Max concurrent sessions: {}",
                config.fetch.pooled.max_concurrent_sessions
            );
            println!(
                "  Max requests per minute: {}",
                config.fetch.pooled.max_requests_per_minute
            );
        }
        FetchStrategyKind::Isolated => {
            println!(
                "  Inter-item delay: {}-{}ms",
                config.fetch.isolated.min_delay_ms, config.fetch.isolated.max_delay_ms
            );
        }
    }
    println!(
        "  Retries: {} (base {}ms, +{}ms per retry)",
        config.retry.max_retries, config.retry.base_delay_ms, config.retry.increment_ms
    );
    println!(
        "  Solving service: {}",
        config
            .challenge
            .solver_endpoint
            .as_deref()
            .unwrap_or("none")
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Images: {}", config.output.image_dir);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage, &config.crawl.collection_key, 5)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --clear-cache mode
fn handle_clear_cache(config: &Config) -> anyhow::Result<()> {
    let mut storage = open_storage(Path::new(&config.output.database_path))?;
    let removed = storage.clear_cache(&config.crawl.collection_key)?;
    println!(
        "✓ Removed {} cached URL(s) for collection '{}'",
        removed, config.crawl.collection_key
    );
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str) -> anyhow::Result<CrawlSummary> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, finishing in-flight items");
            let _ = shutdown_tx.send(true);

            // Second Ctrl+C skips the grace period.
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::error!("Force quit requested, exiting immediately");
                std::process::exit(130);
            }
        }
    });

    let summary = crawl(config, config_hash, shutdown_rx)
        .await
        .context("crawl could not start")?;
    print_summary(&summary);
    Ok(summary)
}

fn write_report(config: &Config, summary: &CrawlSummary, path: &Path) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage, &summary.collection_key, 1)?;
    generate_markdown_report(summary, &stats, path)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    println!("✓ Report written to: {}", path.display());
    Ok(())
}
