//! Batch persistence
//!
//! Upserts extracted listings by link: an existing listing keeps its
//! identifier and has its content replaced, a new listing takes the next
//! identifier from the run's allocation.

use crate::record::ListingRecord;
use crate::reconcile::IdentifierPool;
use crate::storage::traits::{ListingStore, StorageResult};
use tracing::{debug, error, warn};

/// Counts of what one `save_records` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub inserted: usize,
    pub updated: usize,
    /// Records refused by the required-field / coordinate gate
    pub rejected: usize,
    /// Records whose write failed
    pub failed: usize,
}

impl SaveReport {
    /// True when nothing was written
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0
    }

    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn absorb(&mut self, other: SaveReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }
}

/// Saves a batch of records into a collection
///
/// # Arguments
///
/// * `store` - The listing store
/// * `collection` - Target collection
/// * `records` - Extracted records, already flattened
/// * `ids` - Identifier allocation for the run, consumed in order
/// * `now` - Epoch seconds stamped as `created_date`
///
/// # Returns
///
/// * `Ok(SaveReport)` - Per-record outcomes; a failing record never stops
///   its siblings
/// * `Err(StorageError)` - The store could not be queried for identifiers
pub fn save_records<S: ListingStore + ?Sized>(
    store: &mut S,
    collection: &str,
    records: &[ListingRecord],
    ids: &mut IdentifierPool,
    now: i64,
) -> StorageResult<SaveReport> {
    let mut report = SaveReport::default();

    for record in records {
        if let Err(reason) = record.check_persistable() {
            warn!(
                "Skipping {}: {}",
                record.link().unwrap_or("<no link>"),
                reason
            );
            report.rejected += 1;
            continue;
        }

        // check_persistable guarantees a link
        let link = record.link().unwrap_or_default();

        let outcome = match store.find_by_link(collection, link) {
            Ok(Some(existing)) => store
                .replace(collection, existing.id, record, now)
                .map(|_| false),
            Ok(None) => next_identifier(store, collection, ids)
                .and_then(|id| {
                    debug!("Inserting {} as {}", link, id);
                    store.insert(collection, id, record, now)
                })
                .map(|_| true),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(true) => report.inserted += 1,
            Ok(false) => report.updated += 1,
            Err(e) => {
                error!("Failed to save {}: {}", link, e);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Next free identifier: the allocation first, then `max + 1`
fn next_identifier<S: ListingStore + ?Sized>(
    store: &S,
    collection: &str,
    ids: &mut IdentifierPool,
) -> StorageResult<i64> {
    while let Some(id) = ids.next() {
        if store.get(collection, id)?.is_none() {
            return Ok(id);
        }
        warn!("Identifier {} already taken in {}, skipping", id, collection);
    }

    let fallback = store
        .max_identifier(collection)?
        .map_or(ids.floor(), |max| (max + 1).max(ids.floor()));
    Ok(fallback)
}
