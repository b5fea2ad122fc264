//! Storage traits and error types
//!
//! This module defines the trait interface for listing stores and
//! associated error types.

use crate::record::ListingRecord;
use crate::storage::RunRecord;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A persisted listing
#[derive(Debug, Clone, PartialEq)]
pub struct StoredListing {
    /// Stable identifier, assigned at first insert
    pub id: i64,
    pub link: String,
    /// Epoch seconds of the last write
    pub created_date: i64,
    pub record: ListingRecord,
}

/// Trait for listing store implementations
///
/// Listings live in named collections (one per site). Within a collection a
/// listing is addressed by its integer identifier and is unique by `link`.
pub trait ListingStore {
    // ===== Identifiers =====

    /// All identifiers in use in a collection
    fn identifiers(&self, collection: &str) -> StorageResult<BTreeSet<i64>>;

    /// The highest identifier in use, if any
    fn max_identifier(&self, collection: &str) -> StorageResult<Option<i64>>;

    // ===== Reconciliation =====

    /// Links whose `created_date` is strictly after `since` (epoch seconds)
    fn fresh_links(&self, collection: &str, since: i64) -> StorageResult<HashSet<String>>;

    /// Deletes every listing whose link is not in `keep`
    ///
    /// # Returns
    ///
    /// The identifiers that were freed
    fn purge_absent(&mut self, collection: &str, keep: &[String]) -> StorageResult<Vec<i64>>;

    // ===== Listings =====

    fn find_by_link(&self, collection: &str, link: &str) -> StorageResult<Option<StoredListing>>;

    fn get(&self, collection: &str, id: i64) -> StorageResult<Option<StoredListing>>;

    /// Inserts a new listing under the given identifier
    fn insert(
        &mut self,
        collection: &str,
        id: i64,
        record: &ListingRecord,
        created_date: i64,
    ) -> StorageResult<()>;

    /// Replaces the content of an existing listing, keeping its identifier
    fn replace(
        &mut self,
        collection: &str,
        id: i64,
        record: &ListingRecord,
        created_date: i64,
    ) -> StorageResult<()>;

    fn count(&self, collection: &str) -> StorageResult<usize>;

    /// Every listing of a collection, ordered by identifier
    fn list(&self, collection: &str) -> StorageResult<Vec<StoredListing>>;

    /// Deletes every listing of a collection
    fn clear(&mut self, collection: &str) -> StorageResult<usize>;

    /// Names of the collections holding at least one listing
    fn collections(&self) -> StorageResult<Vec<String>>;

    // ===== Run Tracking =====

    /// Stores a finished site run and returns its ID
    fn record_run(&mut self, run: &RunRecord) -> StorageResult<i64>;

    /// Most recent runs first
    fn latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;
}
