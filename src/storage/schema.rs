//! Database schema definitions
//!
//! This module contains the SQL schema for the listing store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Listings, one collection per site
CREATE TABLE IF NOT EXISTS listings (
    collection TEXT NOT NULL,
    id INTEGER NOT NULL,
    link TEXT NOT NULL,
    created_date INTEGER NOT NULL,
    document TEXT NOT NULL,
    PRIMARY KEY (collection, id),
    UNIQUE (collection, link)
);

CREATE INDEX IF NOT EXISTS idx_listings_created ON listings(collection, created_date);

-- One row per site crawl
CREATE TABLE IF NOT EXISTS crawl_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site TEXT NOT NULL,
    collection TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    total_urls INTEGER NOT NULL DEFAULT 0,
    processed_urls INTEGER NOT NULL DEFAULT 0,
    inserted INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0,
    rejected INTEGER NOT NULL DEFAULT 0,
    purged INTEGER NOT NULL DEFAULT 0,
    batches_persisted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_crawl_runs_site ON crawl_runs(site);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
