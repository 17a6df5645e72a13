//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Listing-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per orchestrator run
CREATE TABLE IF NOT EXISTS crawl_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    collection_key TEXT NOT NULL,
    item_budget INTEGER,
    config_hash TEXT NOT NULL,
    items_found INTEGER NOT NULL DEFAULT 0,
    items_new INTEGER NOT NULL DEFAULT 0,
    items_updated INTEGER NOT NULL DEFAULT 0,
    items_failed INTEGER NOT NULL DEFAULT 0,
    images_ok INTEGER NOT NULL DEFAULT 0,
    images_failed INTEGER NOT NULL DEFAULT 0,
    pages_failed INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_collection ON crawl_sessions(collection_key);

-- Discovery cache: item URLs found on listing pages
CREATE TABLE IF NOT EXISTS discovered_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    collection_key TEXT NOT NULL,
    page_number INTEGER NOT NULL,
    discovered_at TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    outcome TEXT NOT NULL DEFAULT 'unset',
    error_note TEXT,
    processed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_discovered_pending
    ON discovered_urls(collection_key, processed, page_number, id);

-- Listing pages walked, including pages whose links were all cached already
CREATE TABLE IF NOT EXISTS discovery_pages (
    collection_key TEXT NOT NULL,
    page_number INTEGER NOT NULL,
    walked_at TEXT NOT NULL,
    PRIMARY KEY (collection_key, page_number)
);

-- Append-only audit trail of item and phase failures
CREATE TABLE IF NOT EXISTS crawl_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES crawl_sessions(id),
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    stack TEXT,
    url TEXT,
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_errors_session ON crawl_errors(session_id);

-- Structured records produced by the extraction phase
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    collection_key TEXT NOT NULL,
    title TEXT NOT NULL,
    fields_json TEXT NOT NULL,
    image_urls_json TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection_key);

-- Downloaded (or failed) images of a record
CREATE TABLE IF NOT EXISTS record_images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id TEXT NOT NULL REFERENCES records(id),
    source_url TEXT NOT NULL,
    local_path TEXT,
    status TEXT NOT NULL,
    error TEXT,
    fetched_at TEXT NOT NULL,
    UNIQUE(record_id, source_url)
);
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
