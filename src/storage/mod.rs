//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - The discovery cache that makes discovery resumable
//! - Crawl session bookkeeping and the error audit trail
//! - Structured records and their downloaded images

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{
    DiscoveryCache, RecordRepository, SessionStore, Storage, StorageError, StorageResult,
};

use crate::state::{ErrorKind, SessionStatus, UrlOutcome};
use crate::CrawlError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(CrawlError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, CrawlError> {
    SqliteStorage::new(path)
}

/// An item URL in the discovery cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUrl {
    pub id: i64,
    pub url: String,
    pub collection_key: String,
    pub page_number: u32,
    pub discovered_at: String,
    pub processed: bool,
    pub outcome: UrlOutcome,
    pub error_note: Option<String>,
}

/// Aggregate counts of the discovery cache for one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    /// Highest listing page with at least one cached URL (0 when empty)
    pub last_page_seen: u32,
}

impl CacheStats {
    pub fn pending(&self) -> u64 {
        self.total.saturating_sub(self.processed)
    }
}

/// Running counters of a crawl session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    /// URLs taken into the extraction phase
    pub found: u64,
    pub new: u64,
    pub updated: u64,
    pub failed: u64,
    pub images_ok: u64,
    pub images_failed: u64,
    /// Listing pages that still failed after retries
    pub pages_failed: u64,
}

impl SessionCounters {
    /// Items that reached a terminal outcome
    pub fn completed(&self) -> u64 {
        self.new + self.updated + self.failed
    }
}

/// Represents a crawl session in the database
#[derive(Debug, Clone)]
pub struct CrawlSessionRecord {
    pub id: i64,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub collection_key: String,
    pub item_budget: Option<u32>,
    pub config_hash: String,
    pub counters: SessionCounters,
    pub status: SessionStatus,
    pub error_message: Option<String>,
}

/// One entry of the crawl error audit trail
#[derive(Debug, Clone)]
pub struct CrawlErrorRecord {
    pub id: i64,
    pub session_id: i64,
    pub kind: ErrorKind,
    pub message: String,
    pub stack: Option<String>,
    pub url: Option<String>,
    pub occurred_at: String,
}

/// A structured record produced by the extraction service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredRecord {
    /// Stable site identifier of the item
    pub id: String,
    pub url: String,
    pub collection_key: String,
    pub title: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

/// Whether an upsert created a new record or refreshed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Status of a single image download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Downloaded,
    Failed,
}

impl ImageStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "downloaded" => Some(Self::Downloaded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Result of downloading one image of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub record_id: String,
    pub source_url: String,
    pub local_path: Option<String>,
    pub status: ImageStatus,
    pub error: Option<String>,
}
