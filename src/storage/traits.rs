//! Storage traits and error types
//!
//! The orchestrator depends on three narrow repositories: the discovery
//! cache, the session store and the record repository. `Storage` is their
//! union and is what a backend implements.

use crate::state::{ErrorKind, SessionStatus};
use crate::storage::{
    CacheStats, CrawlErrorRecord, CrawlSessionRecord, DiscoveredUrl, ImageRecord,
    SessionCounters, StructuredRecord, UpsertOutcome,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Crawl session not found: {0}")]
    SessionNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistent, append-only record of item URLs found per listing page
pub trait DiscoveryCache {
    /// Saves the item URLs found on one listing page
    ///
    /// URLs already present (from any page or collection) are skipped.
    ///
    /// # Arguments
    ///
    /// * `urls` - Absolute item URLs in listing order
    /// * `page_number` - 1-based listing page they were found on
    /// * `collection_key` - Collection the page belongs to
    ///
    /// # Returns
    ///
    /// The number of URLs actually inserted
    fn save_batch(
        &mut self,
        urls: &[String],
        page_number: u32,
        collection_key: &str,
    ) -> StorageResult<usize>;

    /// Gets the URLs still waiting for extraction, ordered by
    /// `(page_number, insertion order)`
    fn get_unprocessed_urls(&self, collection_key: &str) -> StorageResult<Vec<DiscoveredUrl>>;

    /// Gets a single cached URL
    fn get_discovered_url(&self, url: &str) -> StorageResult<Option<DiscoveredUrl>>;

    /// Gets aggregate counts for a collection
    fn get_stats(&self, collection_key: &str) -> StorageResult<CacheStats>;

    /// Marks a URL as processed with its final outcome
    ///
    /// Only an unprocessed URL changes; returns false if the URL was unknown
    /// or already processed.
    fn mark_processed(
        &mut self,
        url: &str,
        success: bool,
        error_note: Option<&str>,
    ) -> StorageResult<bool>;

    /// Returns true once discovery has reached the target page count
    fn is_discovery_complete(&self, collection_key: &str, target_pages: u32) -> StorageResult<bool> {
        let stats = self.get_stats(collection_key)?;
        Ok(stats.last_page_seen > 0 && stats.last_page_seen >= target_pages)
    }

    /// Deletes every cached URL of a collection
    ///
    /// # Returns
    ///
    /// The number of rows removed
    fn clear_cache(&mut self, collection_key: &str) -> StorageResult<u64>;
}

/// Crawl session bookkeeping and the error audit trail
pub trait SessionStore {
    /// Opens a new session in `Running` status
    ///
    /// # Returns
    ///
    /// The ID of the newly created session
    fn create_session(
        &mut self,
        collection_key: &str,
        item_budget: Option<u32>,
        config_hash: &str,
    ) -> StorageResult<i64>;

    /// Persists the current counters without touching the status
    fn update_counters(&mut self, session_id: i64, counters: &SessionCounters)
        -> StorageResult<()>;

    /// Closes a session with its terminal status
    fn close_session(
        &mut self,
        session_id: i64,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Gets a session by ID
    fn get_session(&self, session_id: i64) -> StorageResult<CrawlSessionRecord>;

    /// Gets the most recent sessions, newest first
    fn recent_sessions(&self, limit: usize) -> StorageResult<Vec<CrawlSessionRecord>>;

    /// Appends an entry to the error audit trail
    fn record_error(
        &mut self,
        session_id: i64,
        kind: ErrorKind,
        message: &str,
        stack: Option<&str>,
        url: Option<&str>,
    ) -> StorageResult<i64>;

    /// Gets the errors recorded for a session in insertion order
    fn get_session_errors(&self, session_id: i64) -> StorageResult<Vec<CrawlErrorRecord>>;

    /// Gets error counts per kind for a session
    fn error_summary(&self, session_id: i64) -> StorageResult<Vec<(ErrorKind, u64)>>;
}

/// Structured records and their images
pub trait RecordRepository {
    /// Inserts or updates a record keyed by its ID
    fn upsert_record(&mut self, record: &StructuredRecord) -> StorageResult<UpsertOutcome>;

    /// Gets a record by ID
    fn find_by_id(&self, id: &str) -> StorageResult<Option<StructuredRecord>>;

    /// Counts the records already persisted for a collection
    fn count_records(&self, collection_key: &str) -> StorageResult<u64>;

    /// Stores image download results; a repeated source URL replaces the old row
    fn insert_images(&mut self, images: &[ImageRecord]) -> StorageResult<usize>;

    /// Gets the image rows of a record
    fn get_images(&self, record_id: &str) -> StorageResult<Vec<ImageRecord>>;
}

/// Everything the orchestrator needs from a storage backend
pub trait Storage: DiscoveryCache + SessionStore + RecordRepository {}

impl<T: DiscoveryCache + SessionStore + RecordRepository> Storage for T {}
