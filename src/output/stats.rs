//! Statistics from the listing database
//!
//! This module provides functionality for extracting and displaying
//! per-collection listing counts and the most recent crawl runs.

use crate::storage::{ListingStore, RunRecord};
use crate::Result;
use chrono::{TimeZone, Utc};

/// Listing counts for one collection
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionStatistics {
    pub collection: String,
    pub listings: usize,
    /// Oldest and newest `created_date`, epoch seconds
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

/// Database statistics summary
#[derive(Debug, Clone)]
pub struct Statistics {
    pub collections: Vec<CollectionStatistics>,
    /// Most recent runs first
    pub recent_runs: Vec<RunRecord>,
}

impl Statistics {
    pub fn total_listings(&self) -> usize {
        self.collections.iter().map(|c| c.listings).sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The listing store to query
/// * `run_limit` - How many recent runs to include
pub fn load_statistics<S: ListingStore + ?Sized>(store: &S, run_limit: usize) -> Result<Statistics> {
    let mut collections = Vec::new();

    for collection in store.collections()? {
        let listings = store.list(&collection)?;
        let dates = listings.iter().map(|l| l.created_date);
        collections.push(CollectionStatistics {
            listings: listings.len(),
            oldest: dates.clone().min(),
            newest: dates.max(),
            collection,
        });
    }

    Ok(Statistics {
        collections,
        recent_runs: store.latest_runs(run_limit)?,
    })
}

fn format_epoch(epoch: Option<i64>) -> String {
    epoch
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &Statistics) {
    println!("=== Listing Statistics ===\n");

    println!("Collections:");
    if stats.collections.is_empty() {
        println!("  (none)");
    }
    for c in &stats.collections {
        println!(
            "  {}: {} listings (oldest {}, newest {})",
            c.collection,
            c.listings,
            format_epoch(c.oldest),
            format_epoch(c.newest)
        );
    }
    println!("  Total: {}", stats.total_listings());
    println!();

    if !stats.recent_runs.is_empty() {
        println!("Recent Runs:");
        for run in &stats.recent_runs {
            println!(
                "  #{} {} [{}] {} -> {}: {}/{} URLs, {} new, {} updated, {} rejected, {} purged",
                run.id.unwrap_or_default(),
                run.site,
                run.status,
                run.started_at,
                run.finished_at.as_deref().unwrap_or("-"),
                run.processed_urls,
                run.total_urls,
                run.inserted,
                run.updated,
                run.rejected,
                run.purged
            );
        }
        println!();
    }
}
