//! Storage module for persisting listings
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Listing documents keyed by collection, identifier and link
//! - Reconciliation queries (fresh links, purging vanished listings)
//! - Batch persistence with identifier assignment
//! - Run tracking

mod persist;
mod schema;
mod sqlite;
mod traits;

pub use persist::{save_records, SaveReport};
pub use sqlite::SqliteStore;
pub use traits::{ListingStore, StorageError, StorageResult, StoredListing};

use crate::ChintaiError;
use chrono::Utc;

use std::path::Path;

/// Initializes or opens a listing database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Successfully initialized storage
/// * `Err(ChintaiError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStore, ChintaiError> {
    SqliteStore::new(path)
}

/// Current time as epoch seconds, the unit of `created_date`
pub fn epoch_now() -> i64 {
    Utc::now().timestamp()
}

/// Represents one site crawl
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: Option<i64>,
    pub site: String,
    pub collection: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub total_urls: usize,
    pub processed_urls: usize,
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
    pub purged: usize,
    pub batches_persisted: usize,
}

impl RunRecord {
    /// Starts a run record stamped with the current time
    pub fn new(site: &str, collection: &str, config_hash: &str) -> Self {
        Self {
            id: None,
            site: site.to_string(),
            collection: collection.to_string(),
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            config_hash: config_hash.to_string(),
            status: RunStatus::Failed,
            total_urls: 0,
            processed_urls: 0,
            inserted: 0,
            updated: 0,
            rejected: 0,
            purged: 0,
            batches_persisted: 0,
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now().to_rfc3339());
    }
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every batch was processed
    Completed,
    /// The consecutive failure limit stopped the crawl early
    Aborted,
    /// The run could not start or crawl at all
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "aborted" => Some(Self::Aborted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[RunStatus::Completed, RunStatus::Aborted, RunStatus::Failed] {
            let db_str = status.to_db_string();
            let parsed = RunStatus::from_db_string(db_str);
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("running"), None);
    }

    #[test]
    fn test_run_record_finish() {
        let mut run = RunRecord::new("mitsui", "room_mitsui", "hash");
        assert!(run.finished_at.is_none());
        run.finish(RunStatus::Completed);
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_open_storage_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("listings.db");
        let store = open_storage(&path).unwrap();
        assert_eq!(store.count("anything").unwrap(), 0);
        assert!(path.exists());
    }
}
