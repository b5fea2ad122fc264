//! Reconciliation and identifier allocation
//!
//! Before a site is crawled, the freshly discovered URL list is compared with
//! what the collection already holds:
//! - listings no longer advertised are purged
//! - listings written within the staleness window are skipped
//! - identifiers are allocated for the remaining URLs, reusing gaps first

use crate::storage::{ListingStore, StorageResult};
use std::collections::{BTreeSet, HashSet, VecDeque};
use tracing::{info, warn};

/// Outcome of reconciling one collection against a discovered URL list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// URLs to (re-)crawl, in discovery order
    pub to_crawl: Vec<String>,
    /// Identifiers available to new listings, gaps first
    pub identifiers: IdentifierPool,
    /// Number of discovered URLs skipped because they are fresh
    pub fresh: usize,
    /// Identifiers of the listings that were purged
    pub purged: Vec<i64>,
}

impl ReconcilePlan {
    /// Plan used when reconciliation could not run: crawl everything
    pub fn crawl_all(urls: &[String], floor: i64) -> Self {
        Self {
            to_crawl: dedup_preserving_order(urls),
            identifiers: IdentifierPool::new(Vec::new(), floor),
            fresh: 0,
            purged: Vec::new(),
        }
    }
}

/// Identifiers handed to newly inserted listings, consumed in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierPool {
    ids: VecDeque<i64>,
    floor: i64,
    issued: usize,
}

impl IdentifierPool {
    pub fn new(ids: Vec<i64>, floor: i64) -> Self {
        Self {
            ids: ids.into(),
            floor,
            issued: 0,
        }
    }

    /// Takes the next allocated identifier, if any remain
    pub fn next(&mut self) -> Option<i64> {
        let id = self.ids.pop_front()?;
        self.issued += 1;
        Some(id)
    }

    /// Identifiers not yet handed out
    pub fn remaining(&self) -> usize {
        self.ids.len()
    }

    /// Identifiers handed out so far
    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Lowest identifier the collection may use
    pub fn floor(&self) -> i64 {
        self.floor
    }

    pub fn peek(&self) -> impl Iterator<Item = &i64> {
        self.ids.iter()
    }
}

/// Allocates `needed` identifiers for a collection
///
/// Gaps in `[floor, high]` come first in ascending order, then a contiguous
/// range above `high`, where `high` is the largest identifier in use (or
/// `floor - 1` for an empty collection). Only as many identifiers as needed
/// are returned.
pub fn allocate_identifiers(existing: &BTreeSet<i64>, floor: i64, needed: usize) -> Vec<i64> {
    if needed == 0 {
        return Vec::new();
    }

    let high = existing
        .iter()
        .next_back()
        .copied()
        .map_or(floor - 1, |max| max.max(floor - 1));

    let mut ids: Vec<i64> = (floor..=high)
        .filter(|id| !existing.contains(id))
        .take(needed)
        .collect();

    let mut next = high + 1;
    while ids.len() < needed {
        ids.push(next);
        next += 1;
    }
    ids
}

/// Reconciles a collection with a freshly discovered URL list
///
/// # Arguments
///
/// * `store` - The listing store
/// * `collection` - Collection holding the site's listings
/// * `urls` - Listing URLs currently advertised by the site
/// * `complete` - Whether `urls` is the site's full set; listings absent
///   from a partial set are kept
/// * `staleness_secs` - Age after which a stored listing is crawled again
/// * `floor` - Lowest identifier the collection may use
/// * `now` - Current time in epoch seconds
///
/// # Returns
///
/// The URLs to crawl and the identifiers their new listings will take. An
/// empty `urls` list yields an empty plan and purges nothing.
pub fn reconcile<S: ListingStore + ?Sized>(
    store: &mut S,
    collection: &str,
    urls: &[String],
    complete: bool,
    staleness_secs: i64,
    floor: i64,
    now: i64,
) -> StorageResult<ReconcilePlan> {
    if urls.is_empty() {
        return Ok(ReconcilePlan {
            identifiers: IdentifierPool::new(Vec::new(), floor),
            ..ReconcilePlan::default()
        });
    }

    let urls = dedup_preserving_order(urls);

    let fresh_links = store.fresh_links(collection, now - staleness_secs)?;
    let purged = if complete {
        store.purge_absent(collection, &urls)?
    } else {
        warn!(
            "Discovery of {} was incomplete, keeping listings not seen this run",
            collection
        );
        Vec::new()
    };
    if !purged.is_empty() {
        info!(
            "Removed {} listings no longer advertised from {}",
            purged.len(),
            collection
        );
    }

    let (fresh, to_crawl): (Vec<String>, Vec<String>) =
        urls.into_iter().partition(|url| fresh_links.contains(url));

    let existing = store.identifiers(collection)?;
    let ids = allocate_identifiers(&existing, floor, to_crawl.len());

    let max_before = existing.iter().next_back().copied().unwrap_or(floor - 1);
    let gaps = ids.iter().filter(|id| **id <= max_before).count();
    info!(
        "Filtered {}: {} fresh, {} to crawl, identifiers: {} gaps + {} new",
        collection,
        fresh.len(),
        to_crawl.len(),
        gaps,
        ids.len() - gaps
    );

    Ok(ReconcilePlan {
        to_crawl,
        identifiers: IdentifierPool::new(ids, floor),
        fresh: fresh.len(),
        purged,
    })
}

fn dedup_preserving_order(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.iter()
        .filter(|url| seen.insert(url.as_str()))
        .cloned()
        .collect()
}
