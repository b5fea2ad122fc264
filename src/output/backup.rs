//! Collection backup and cleaning
//!
//! A backup is a pretty-printed JSON array of the collection's documents,
//! each carrying its identifier as `_id` and its `created_date`.

use crate::storage::{epoch_now, ListingStore};
use crate::Result;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// What `clean_collection` did
#[derive(Debug, Clone, PartialEq)]
pub struct CleanReport {
    /// Backup file, if the collection held anything
    pub backup: Option<PathBuf>,
    pub deleted: usize,
}

/// Writes a collection to `{backup_dir}/{collection}_backup_{epoch}.json`
///
/// # Returns
///
/// * `Ok(Some(path))` - The backup file
/// * `Ok(None)` - The collection is empty, nothing was written
/// * `Err(ChintaiError)` - Reading the store or writing the file failed
pub fn backup_collection<S: ListingStore + ?Sized>(
    store: &S,
    backup_dir: &Path,
    collection: &str,
) -> Result<Option<PathBuf>> {
    let listings = store.list(collection)?;
    if listings.is_empty() {
        info!("No data to back up in {}", collection);
        return Ok(None);
    }

    let documents: Vec<Value> = listings
        .into_iter()
        .map(|listing| {
            let mut document: Map<String, Value> = listing.record.into_fields();
            document.insert("_id".to_string(), Value::from(listing.id.to_string()));
            document.insert("created_date".to_string(), Value::from(listing.created_date));
            Value::Object(document)
        })
        .collect();

    fs::create_dir_all(backup_dir)?;
    let path = backup_dir.join(format!("{}_backup_{}.json", collection, epoch_now()));
    fs::write(&path, serde_json::to_string_pretty(&documents)?)?;

    info!(
        "Backed up {} documents from {} to {}",
        documents.len(),
        collection,
        path.display()
    );
    Ok(Some(path))
}

/// Deletes every document of a collection, backing it up first if asked
pub fn clean_collection<S: ListingStore + ?Sized>(
    store: &mut S,
    backup_dir: &Path,
    collection: &str,
    backup: bool,
) -> Result<CleanReport> {
    let backup = if backup {
        backup_collection(&*store, backup_dir, collection)?
    } else {
        None
    };

    let deleted = store.clear(collection)?;
    info!("Cleaned {} documents from {}", deleted, collection);

    Ok(CleanReport { backup, deleted })
}
