//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the ListingStore
//! trait. Each listing is stored as a JSON document next to the columns the
//! crawler queries on (identifier, link, created date).

use crate::record::ListingRecord;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ListingStore, StorageError, StorageResult, StoredListing};
use crate::storage::{RunRecord, RunStatus};
use crate::ChintaiError;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Creates a new SqliteStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(ChintaiError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, ChintaiError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, ChintaiError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, i64, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    fn decode(raw: (i64, String, i64, String)) -> StorageResult<StoredListing> {
        let (id, link, created_date, document) = raw;
        let record: ListingRecord = serde_json::from_str(&document)?;
        Ok(StoredListing {
            id,
            link,
            created_date,
            record,
        })
    }

    fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            site: row.get(1)?,
            collection: row.get(2)?,
            started_at: row.get(3)?,
            finished_at: row.get(4)?,
            config_hash: row.get(5)?,
            status: RunStatus::from_db_string(&row.get::<_, String>(6)?)
                .unwrap_or(RunStatus::Failed),
            total_urls: row.get::<_, i64>(7)? as usize,
            processed_urls: row.get::<_, i64>(8)? as usize,
            inserted: row.get::<_, i64>(9)? as usize,
            updated: row.get::<_, i64>(10)? as usize,
            rejected: row.get::<_, i64>(11)? as usize,
            purged: row.get::<_, i64>(12)? as usize,
            batches_persisted: row.get::<_, i64>(13)? as usize,
        })
    }
}

impl ListingStore for SqliteStore {
    // ===== Identifiers =====

    fn identifiers(&self, collection: &str) -> StorageResult<BTreeSet<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM listings WHERE collection = ?1")?;
        let ids = stmt
            .query_map(params![collection], |row| row.get(0))?
            .collect::<Result<BTreeSet<i64>, _>>()?;
        Ok(ids)
    }

    fn max_identifier(&self, collection: &str) -> StorageResult<Option<i64>> {
        let max = self.conn.query_row(
            "SELECT MAX(id) FROM listings WHERE collection = ?1",
            params![collection],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(max)
    }

    // ===== Reconciliation =====

    fn fresh_links(&self, collection: &str, since: i64) -> StorageResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT link FROM listings WHERE collection = ?1 AND created_date > ?2")?;
        let links = stmt
            .query_map(params![collection, since], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(links)
    }

    fn purge_absent(&mut self, collection: &str, keep: &[String]) -> StorageResult<Vec<i64>> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS keep_links (link TEXT PRIMARY KEY);
             DELETE FROM keep_links;",
        )?;

        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO keep_links (link) VALUES (?1)")?;
            for link in keep {
                stmt.execute(params![link])?;
            }
        }

        let freed = {
            let mut stmt = tx.prepare(
                "SELECT id FROM listings
                 WHERE collection = ?1 AND link NOT IN (SELECT link FROM keep_links)
                 ORDER BY id",
            )?;
            let ids = stmt
                .query_map(params![collection], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            ids
        };

        tx.execute(
            "DELETE FROM listings
             WHERE collection = ?1 AND link NOT IN (SELECT link FROM keep_links)",
            params![collection],
        )?;
        tx.execute("DELETE FROM keep_links", [])?;
        tx.commit()?;

        Ok(freed)
    }

    // ===== Listings =====

    fn find_by_link(&self, collection: &str, link: &str) -> StorageResult<Option<StoredListing>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, link, created_date, document FROM listings
                 WHERE collection = ?1 AND link = ?2",
                params![collection, link],
                Self::listing_from_row,
            )
            .optional()?;
        raw.map(Self::decode).transpose()
    }

    fn get(&self, collection: &str, id: i64) -> StorageResult<Option<StoredListing>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, link, created_date, document FROM listings
                 WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                Self::listing_from_row,
            )
            .optional()?;
        raw.map(Self::decode).transpose()
    }

    fn insert(
        &mut self,
        collection: &str,
        id: i64,
        record: &ListingRecord,
        created_date: i64,
    ) -> StorageResult<()> {
        let link = record
            .link()
            .ok_or_else(|| StorageError::Database("record has no link".to_string()))?;
        let document = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO listings (collection, id, link, created_date, document)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![collection, id, link, created_date, document],
        )?;
        Ok(())
    }

    fn replace(
        &mut self,
        collection: &str,
        id: i64,
        record: &ListingRecord,
        created_date: i64,
    ) -> StorageResult<()> {
        let link = record
            .link()
            .ok_or_else(|| StorageError::Database("record has no link".to_string()))?;
        let document = serde_json::to_string(record)?;
        let changed = self.conn.execute(
            "UPDATE listings SET link = ?3, created_date = ?4, document = ?5
             WHERE collection = ?1 AND id = ?2",
            params![collection, id, link, created_date, document],
        )?;
        if changed == 0 {
            return Err(StorageError::Database(format!(
                "listing {} not found in {}",
                id, collection
            )));
        }
        Ok(())
    }

    fn count(&self, collection: &str) -> StorageResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM listings WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn list(&self, collection: &str) -> StorageResult<Vec<StoredListing>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, link, created_date, document FROM listings
             WHERE collection = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![collection], Self::listing_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::decode).collect()
    }

    fn clear(&mut self, collection: &str) -> StorageResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM listings WHERE collection = ?1",
            params![collection],
        )?;
        Ok(deleted)
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT collection FROM listings ORDER BY collection")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    // ===== Run Tracking =====

    fn record_run(&mut self, run: &RunRecord) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO crawl_runs (site, collection, started_at, finished_at, config_hash,
             status, total_urls, processed_urls, inserted, updated, rejected, purged,
             batches_persisted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                run.site,
                run.collection,
                run.started_at,
                run.finished_at,
                run.config_hash,
                run.status.to_db_string(),
                run.total_urls as i64,
                run.processed_urls as i64,
                run.inserted as i64,
                run.updated as i64,
                run.rejected as i64,
                run.purged as i64,
                run.batches_persisted as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn latest_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, site, collection, started_at, finished_at, config_hash, status,
             total_urls, processed_urls, inserted, updated, rejected, purged, batches_persisted
             FROM crawl_runs ORDER BY id DESC LIMIT ?1",
        )?;
        let runs = stmt
            .query_map(params![limit as i64], Self::run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(link: &str, room_type: &str) -> ListingRecord {
        let mut record = ListingRecord::new(link);
        record.set("room_type", room_type);
        record
    }

    #[test]
    fn test_insert_and_find() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        store
            .insert("room_a", 7, &record("https://a/1", "1K"), 100)
            .unwrap();

        let found = store.find_by_link("room_a", "https://a/1").unwrap().unwrap();
        assert_eq!(found.id, 7);
        assert_eq!(found.created_date, 100);
        assert_eq!(found.record.get_str("room_type"), Some("1K"));

        assert!(store.find_by_link("room_b", "https://a/1").unwrap().is_none());
        assert_eq!(store.get("room_a", 7).unwrap().unwrap().link, "https://a/1");
    }

    #[test]
    fn test_replace_keeps_identifier() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        store.insert("c", 1, &record("https://a/1", "1K"), 100).unwrap();
        store.replace("c", 1, &record("https://a/1", "2DK"), 200).unwrap();

        let found = store.get("c", 1).unwrap().unwrap();
        assert_eq!(found.record.get_str("room_type"), Some("2DK"));
        assert_eq!(found.created_date, 200);
        assert_eq!(store.count("c").unwrap(), 1);

        assert!(store.replace("c", 99, &record("https://a/9", "1R"), 1).is_err());
    }

    #[test]
    fn test_identifiers_and_max() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        assert_eq!(store.max_identifier("c").unwrap(), None);

        for (id, link) in [(3, "u3"), (1, "u1"), (5, "u5")] {
            store.insert("c", id, &record(link, "1K"), 0).unwrap();
        }
        assert_eq!(
            store.identifiers("c").unwrap().into_iter().collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
        assert_eq!(store.max_identifier("c").unwrap(), Some(5));
    }

    #[test]
    fn test_fresh_links() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        store.insert("c", 1, &record("old", "1K"), 100).unwrap();
        store.insert("c", 2, &record("new", "1K"), 500).unwrap();

        let fresh = store.fresh_links("c", 100).unwrap();
        assert!(fresh.contains("new"));
        assert!(!fresh.contains("old"));
    }

    #[test]
    fn test_purge_absent() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        for (id, link) in [(1, "u1"), (2, "u2"), (3, "u3")] {
            store.insert("c", id, &record(link, "1K"), 0).unwrap();
        }
        store.insert("other", 2, &record("u2", "1K"), 0).unwrap();

        let freed = store
            .purge_absent("c", &["u1".to_string(), "u3".to_string(), "u9".to_string()])
            .unwrap();
        assert_eq!(freed, vec![2]);
        assert_eq!(store.count("c").unwrap(), 2);
        assert_eq!(store.count("other").unwrap(), 1);

        // temp table is reset between calls
        let freed = store.purge_absent("c", &["u1".to_string()]).unwrap();
        assert_eq!(freed, vec![3]);
    }

    #[test]
    fn test_list_clear_collections() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        store.insert("b", 2, &record("u2", "1K"), 0).unwrap();
        store.insert("b", 1, &record("u1", "1K"), 0).unwrap();
        store.insert("a", 1, &record("u1", "1K"), 0).unwrap();

        let ids: Vec<i64> = store.list("b").unwrap().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.collections().unwrap(), vec!["a", "b"]);

        assert_eq!(store.clear("b").unwrap(), 2);
        assert_eq!(store.collections().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_run_tracking() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let mut run = RunRecord::new("mitsui", "room_mitsui", "abc123");
        run.status = RunStatus::Aborted;
        run.total_urls = 40;
        run.processed_urls = 12;
        run.inserted = 9;

        let first = store.record_run(&run).unwrap();
        run.status = RunStatus::Completed;
        let second = store.record_run(&run).unwrap();
        assert!(second > first);

        let runs = store.latest_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, Some(second));
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[1].status, RunStatus::Aborted);
        assert_eq!(runs[1].processed_urls, 12);
        assert_eq!(runs[1].config_hash, "abc123");
    }
}
