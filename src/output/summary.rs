//! Per-site run summaries

use crate::storage::RunStatus;
use std::time::Duration;

/// Everything a site run did, for operators
#[derive(Debug, Clone, PartialEq)]
pub struct SiteReport {
    pub site: String,
    pub collection: String,
    pub status: RunStatus,
    /// Listing URLs discovered on the site
    pub total_urls: usize,
    /// Result pages that could not be loaded; purging is skipped when any did
    pub failed_pages: Vec<u32>,
    /// Skipped because they were written within the staleness window
    pub fresh: usize,
    pub purged: usize,
    pub to_crawl: usize,
    pub processed: usize,
    pub gone: usize,
    pub failures: usize,
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
    pub batches_persisted: usize,
    pub total_batches: usize,
    pub identifiers_used: usize,
    pub identifiers_allocated: usize,
    pub duration: Duration,
}

impl SiteReport {
    pub fn new(site: &str, collection: &str) -> Self {
        Self {
            site: site.to_string(),
            collection: collection.to_string(),
            status: RunStatus::Completed,
            total_urls: 0,
            failed_pages: Vec::new(),
            fresh: 0,
            purged: 0,
            to_crawl: 0,
            processed: 0,
            gone: 0,
            failures: 0,
            inserted: 0,
            updated: 0,
            rejected: 0,
            batches_persisted: 0,
            total_batches: 0,
            identifiers_used: 0,
            identifiers_allocated: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn aborted(&self) -> bool {
        self.status == RunStatus::Aborted
    }
}

/// Prints a site report to stdout
pub fn print_site_report(report: &SiteReport) {
    let title = if report.aborted() {
        "Summary (aborted on consecutive failures)"
    } else {
        "Summary"
    };

    println!("=== {}: {} ===", report.site, title);
    println!("  Collection: {}", report.collection);
    println!(
        "  URLs: {} discovered, {} fresh, {} purged, {} to crawl",
        report.total_urls, report.fresh, report.purged, report.to_crawl
    );
    if !report.failed_pages.is_empty() {
        println!(
            "  Incomplete discovery: result pages {:?} failed, nothing purged",
            report.failed_pages
        );
    }
    println!(
        "  Processed: {}/{} ({} gone, {} failed)",
        report.processed, report.to_crawl, report.gone, report.failures
    );
    println!(
        "  Saved: {} new, {} updated, {} rejected",
        report.inserted, report.updated, report.rejected
    );
    println!(
        "  Batches persisted: {}/{}",
        report.batches_persisted, report.total_batches
    );
    println!(
        "  Identifiers used: {}/{}",
        report.identifiers_used, report.identifiers_allocated
    );
    println!("  Duration: {:.1}s", report.duration.as_secs_f64());
    println!();
}
