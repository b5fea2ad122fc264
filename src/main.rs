//! Chintai crawler main entry point
//!
//! This is the command-line interface for the rental listing crawler.

use anyhow::Context;
use chintai_crawler::config::{load_config_with_hash, Config, SiteConfig};
use chintai_crawler::crawler::{build_http_client, collect_urls, crawl, PaginatedSource};
use chintai_crawler::output::print_site_report;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Chintai crawler: batched harvester for rental listings
///
/// Discovers listing pages on each configured site, extracts structured
/// fields, and keeps one SQLite collection per site in sync with what the
/// site currently advertises.
#[derive(Parser, Debug)]
#[command(name = "chintai-crawler")]
#[command(version = "1.0.0")]
#[command(about = "Batched crawler for Japanese rental listings", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Only crawl the named site (repeatable)
    #[arg(long = "site", value_name = "NAME")]
    sites: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and discover listing URLs without crawling them
    #[arg(long, conflicts_with_all = ["stats", "backup", "clean"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "backup", "clean"])]
    stats: bool,

    /// Back up a collection to JSON and exit
    #[arg(long, value_name = "COLLECTION", conflicts_with_all = ["dry_run", "stats", "clean"])]
    backup: Option<String>,

    /// Back up, then delete every document of a collection and exit
    #[arg(long, value_name = "COLLECTION", conflicts_with_all = ["dry_run", "stats", "backup"])]
    clean: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, &cli.sites).await
    } else if cli.stats {
        handle_stats(&config)
    } else if let Some(collection) = &cli.backup {
        handle_backup(&config, collection)
    } else if let Some(collection) = &cli.clean {
        handle_clean(&config, collection)
    } else {
        handle_crawl(config, &config_hash, &cli.sites).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("chintai_crawler=info,warn"),
            1 => EnvFilter::new("chintai_crawler=debug,info"),
            2 => EnvFilter::new("chintai_crawler=trace,debug"),
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

fn selected_sites<'a>(config: &'a Config, names: &[String]) -> anyhow::Result<Vec<&'a SiteConfig>> {
    if names.is_empty() {
        return Ok(config.sites.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            config
                .site(name)
                .with_context(|| format!("unknown site '{}'", name))
        })
        .collect()
}

/// Handles the --dry-run mode: shows the configuration and discovered URLs
async fn handle_dry_run(config: &Config, names: &[String]) -> anyhow::Result<()> {
    println!("=== Chintai Crawler Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Batch size: {}", config.crawler.batch_size);
    println!("  Pool size: {}", config.crawler.effective_pool_size());
    println!(
        "  Max consecutive failures: {}",
        config.crawler.max_consecutive_failures
    );
    println!("  Batch delay: {}ms", config.crawler.batch_delay_ms);
    println!(
        "  Staleness window: {}s",
        config.crawler.staleness_window_secs
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Backups: {}", config.storage.backup_dir);

    let client = build_http_client(&config.crawler.user_agent, config.crawler.request_timeout())?;

    for site in selected_sites(config, names)? {
        println!("\nSite {} -> {}:", site.name, site.collection);
        println!("  Listing URL: {}", site.listing_url);
        println!(
            "  Rules: {} fields, {} image categories",
            site.fields.len(),
            site.images.len()
        );

        let source = PaginatedSource::from_site(client.clone(), site)?;
        let discovery = collect_urls(&source, site.default_pages).await;
        println!("  Would crawl up to {} listings", discovery.urls.len());
        if !discovery.is_complete() {
            println!("  Failed result pages: {:?}", discovery.failed_pages);
        }
        for url in discovery.urls.iter().take(5) {
            println!("    * {}", url);
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use chintai_crawler::output::{load_statistics, print_statistics};
    use chintai_crawler::storage::open_storage;

    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&storage, 10)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --backup mode
fn handle_backup(config: &Config, collection: &str) -> anyhow::Result<()> {
    use chintai_crawler::output::backup_collection;
    use chintai_crawler::storage::open_storage;

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    match backup_collection(&storage, Path::new(&config.storage.backup_dir), collection)? {
        Some(path) => println!("✓ Backed up {} to {}", collection, path.display()),
        None => println!("Collection {} is empty, nothing to back up", collection),
    }
    Ok(())
}

/// Handles the --clean mode
fn handle_clean(config: &Config, collection: &str) -> anyhow::Result<()> {
    use chintai_crawler::output::clean_collection;
    use chintai_crawler::storage::open_storage;

    let mut storage = open_storage(Path::new(&config.storage.database_path))?;
    let report = clean_collection(
        &mut storage,
        Path::new(&config.storage.backup_dir),
        collection,
        true,
    )?;

    if let Some(path) = &report.backup {
        println!("✓ Backup written to {}", path.display());
    }
    println!("✓ Cleaned {} documents from {}", report.deleted, collection);
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, sites: &[String]) -> anyhow::Result<()> {
    tracing::info!(
        "Sites: {}, batch size: {}",
        config.sites.len(),
        config.crawler.batch_size
    );

    match crawl(config, config_hash, sites).await {
        Ok(reports) => {
            for report in &reports {
                print_site_report(report);
            }
            tracing::info!("Crawl completed ({} sites)", reports.len());
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
