//! Batch persistence sink
//!
//! Saves every completed batch into the site's collection, drawing
//! identifiers for new listings from the run's allocation.

use crate::crawler::batch::{BatchSink, PageResult};
use crate::reconcile::IdentifierPool;
use crate::record::ListingRecord;
use crate::storage::{epoch_now, save_records, SaveReport, SqliteStore, StorageError};
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Persists batches into one collection
pub struct PersistSink {
    store: Arc<Mutex<SqliteStore>>,
    collection: String,
    identifiers: IdentifierPool,
    totals: SaveReport,
    batches_persisted: usize,
}

impl PersistSink {
    pub fn new(
        store: Arc<Mutex<SqliteStore>>,
        collection: impl Into<String>,
        identifiers: IdentifierPool,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            identifiers,
            totals: SaveReport::default(),
            batches_persisted: 0,
        }
    }

    /// Counts accumulated over every batch so far
    pub fn totals(&self) -> SaveReport {
        self.totals
    }

    /// Batches that wrote at least one listing
    pub fn batches_persisted(&self) -> usize {
        self.batches_persisted
    }

    pub fn identifiers(&self) -> &IdentifierPool {
        &self.identifiers
    }
}

#[async_trait]
impl BatchSink for PersistSink {
    async fn on_batch_complete(
        &mut self,
        results: &[PageResult],
        batch_number: usize,
        total_batches: usize,
    ) -> Result<()> {
        let records: Vec<ListingRecord> = results
            .iter()
            .filter_map(PageResult::as_listing)
            .cloned()
            .collect();

        let report = {
            let mut store = self.store.lock().map_err(|_| StorageError::LockPoisoned)?;
            save_records(
                &mut *store,
                &self.collection,
                &records,
                &mut self.identifiers,
                epoch_now(),
            )?
        };
        self.totals.absorb(report);

        if report.is_noop() {
            warn!(
                "Batch {}/{}: no records saved ({} rejected, {} failed)",
                batch_number, total_batches, report.rejected, report.failed
            );
        } else {
            self.batches_persisted += 1;
            info!(
                "Batch {}/{}: saved {} records to {} ({} new, {} updated, {} rejected)",
                batch_number,
                total_batches,
                report.written(),
                self.collection,
                report.inserted,
                report.updated,
                report.rejected
            );
        }

        Ok(())
    }
}
