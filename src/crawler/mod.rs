//! Crawler module for listing discovery, fetching and batch persistence
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching that classifies failures instead of raising them
//! - Paginated discovery of listing URLs
//! - Batched, concurrent fetch + extract with an abort on failure streaks
//! - Persisting each finished batch
//! - Overall per-site coordination

mod batch;
mod coordinator;
mod discovery;
mod fetcher;
mod processor;
mod sink;

pub use batch::{
    BatchCrawler, BatchOptions, BatchSink, CrawlOutcome, FailureStreak, PageProcessor, PageResult,
};
pub use coordinator::Coordinator;
pub use discovery::{
    collect_urls, DiscoveredPage, Discovery, ListingSource, PageError, PaginatedSource,
};
pub use fetcher::{build_http_client, fetch_page, FetchResult};
pub use processor::ListingProcessor;
pub use sink::PersistSink;

use crate::config::Config;
use crate::output::SiteReport;
use crate::Result;

/// Runs a complete crawl operation
///
/// This is the main entry point for crawling. For each selected site it will:
/// 1. Discover the advertised listing URLs
/// 2. Reconcile them with the stored collection
/// 3. Fetch and extract the listings that need it, batch by batch
/// 4. Persist each batch and record the run
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file
/// * `sites` - Names of the sites to crawl, all sites when empty
///
/// # Returns
///
/// * `Ok(Vec<SiteReport>)` - One report per site that ran
/// * `Err(ChintaiError)` - Setup failed or a site name is unknown
pub async fn crawl(config: Config, config_hash: &str, sites: &[String]) -> Result<Vec<SiteReport>> {
    let coordinator = Coordinator::new(config, config_hash)?;
    coordinator.run_all(sites).await
}
