//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.

use crate::state::{ErrorKind, SessionStatus, UrlOutcome};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    DiscoveryCache, RecordRepository, SessionStore, StorageError, StorageResult,
};
use crate::storage::{
    CacheStats, CrawlErrorRecord, CrawlSessionRecord, DiscoveredUrl, ImageRecord, ImageStatus,
    SessionCounters, StructuredRecord, UpsertOutcome,
};
use crate::CrawlError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;

const DISCOVERED_COLUMNS: &str =
    "id, url, collection_key, page_number, discovered_at, processed, outcome, error_note";

const SESSION_COLUMNS: &str = "id, started_at, ended_at, collection_key, item_budget, config_hash,
     items_found, items_new, items_updated, items_failed, images_ok, images_failed,
     pages_failed, status, error_message";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(CrawlError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, CrawlError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, CrawlError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn discovered_from_row(row: &Row<'_>) -> rusqlite::Result<DiscoveredUrl> {
    Ok(DiscoveredUrl {
        id: row.get(0)?,
        url: row.get(1)?,
        collection_key: row.get(2)?,
        page_number: row.get(3)?,
        discovered_at: row.get(4)?,
        processed: row.get::<_, i64>(5)? != 0,
        outcome: UrlOutcome::from_db_string(&row.get::<_, String>(6)?)
            .unwrap_or(UrlOutcome::Unset),
        error_note: row.get(7)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<CrawlSessionRecord> {
    Ok(CrawlSessionRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        ended_at: row.get(2)?,
        collection_key: row.get(3)?,
        item_budget: row.get(4)?,
        config_hash: row.get(5)?,
        counters: SessionCounters {
            found: row.get::<_, i64>(6)? as u64,
            new: row.get::<_, i64>(7)? as u64,
            updated: row.get::<_, i64>(8)? as u64,
            failed: row.get::<_, i64>(9)? as u64,
            images_ok: row.get::<_, i64>(10)? as u64,
            images_failed: row.get::<_, i64>(11)? as u64,
            pages_failed: row.get::<_, i64>(12)? as u64,
        },
        status: SessionStatus::from_db_string(&row.get::<_, String>(13)?)
            .unwrap_or(SessionStatus::Running),
        error_message: row.get(14)?,
    })
}

impl DiscoveryCache for SqliteStorage {
    fn save_batch(
        &mut self,
        urls: &[String],
        page_number: u32,
        collection_key: &str,
    ) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO discovered_urls (url, collection_key, page_number, discovered_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for url in urls {
                inserted += stmt.execute(params![url, collection_key, page_number, now])?;
            }
        }
        tx.execute(
            "INSERT INTO discovery_pages (collection_key, page_number, walked_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(collection_key, page_number) DO UPDATE SET walked_at = excluded.walked_at",
            params![collection_key, page_number, now],
        )?;
        tx.commit()?;
        Ok(inserted)
    }

    fn get_unprocessed_urls(&self, collection_key: &str) -> StorageResult<Vec<DiscoveredUrl>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM discovered_urls
             WHERE collection_key = ?1 AND processed = 0
             ORDER BY page_number, id",
            DISCOVERED_COLUMNS
        ))?;

        let urls = stmt
            .query_map(params![collection_key], discovered_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(urls)
    }

    fn get_discovered_url(&self, url: &str) -> StorageResult<Option<DiscoveredUrl>> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM discovered_urls WHERE url = ?1",
                    DISCOVERED_COLUMNS
                ),
                params![url],
                discovered_from_row,
            )
            .optional()?;
        Ok(found)
    }

    fn get_stats(&self, collection_key: &str) -> StorageResult<CacheStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(processed), 0),
                    COALESCE(SUM(CASE WHEN outcome = 'success' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN outcome = 'failure' THEN 1 ELSE 0 END), 0),
                    (SELECT COALESCE(MAX(page_number), 0)
                     FROM discovery_pages WHERE collection_key = ?1)
             FROM discovered_urls WHERE collection_key = ?1",
            params![collection_key],
            |row| {
                Ok(CacheStats {
                    total: row.get::<_, i64>(0)? as u64,
                    processed: row.get::<_, i64>(1)? as u64,
                    successful: row.get::<_, i64>(2)? as u64,
                    failed: row.get::<_, i64>(3)? as u64,
                    last_page_seen: row.get(4)?,
                })
            },
        )?;
        Ok(stats)
    }

    fn mark_processed(
        &mut self,
        url: &str,
        success: bool,
        error_note: Option<&str>,
    ) -> StorageResult<bool> {
        let outcome = if success {
            UrlOutcome::Success
        } else {
            UrlOutcome::Failure
        };
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE discovered_urls
             SET processed = 1, outcome = ?1, error_note = ?2, processed_at = ?3
             WHERE url = ?4 AND processed = 0",
            params![outcome.to_db_string(), error_note, now, url],
        )?;
        Ok(changed == 1)
    }

    fn clear_cache(&mut self, collection_key: &str) -> StorageResult<u64> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM discovered_urls WHERE collection_key = ?1",
            params![collection_key],
        )?;
        tx.execute(
            "DELETE FROM discovery_pages WHERE collection_key = ?1",
            params![collection_key],
        )?;
        tx.commit()?;
        Ok(removed as u64)
    }
}

impl SessionStore for SqliteStorage {
    fn create_session(
        &mut self,
        collection_key: &str,
        item_budget: Option<u32>,
        config_hash: &str,
    ) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO crawl_sessions (started_at, collection_key, item_budget, config_hash, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                now,
                collection_key,
                item_budget,
                config_hash,
                SessionStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_counters(
        &mut self,
        session_id: i64,
        counters: &SessionCounters,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE crawl_sessions
             SET items_found = ?1, items_new = ?2, items_updated = ?3, items_failed = ?4,
                 images_ok = ?5, images_failed = ?6, pages_failed = ?7
             WHERE id = ?8",
            params![
                counters.found as i64,
                counters.new as i64,
                counters.updated as i64,
                counters.failed as i64,
                counters.images_ok as i64,
                counters.images_failed as i64,
                counters.pages_failed as i64,
                session_id
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::SessionNotFound(session_id));
        }
        Ok(())
    }

    fn close_session(
        &mut self,
        session_id: i64,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1, ended_at = ?2, error_message = ?3 WHERE id = ?4",
            params![status.to_db_string(), now, error_message, session_id],
        )?;
        if changed == 0 {
            return Err(StorageError::SessionNotFound(session_id));
        }
        Ok(())
    }

    fn get_session(&self, session_id: i64) -> StorageResult<CrawlSessionRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM crawl_sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id],
                session_from_row,
            )
            .optional()?
            .ok_or(StorageError::SessionNotFound(session_id))
    }

    fn recent_sessions(&self, limit: usize) -> StorageResult<Vec<CrawlSessionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_sessions ORDER BY id DESC LIMIT ?1",
            SESSION_COLUMNS
        ))?;

        let sessions = stmt
            .query_map(params![limit as i64], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    fn record_error(
        &mut self,
        session_id: i64,
        kind: ErrorKind,
        message: &str,
        stack: Option<&str>,
        url: Option<&str>,
    ) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO crawl_errors (session_id, kind, message, stack, url, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session_id, kind.to_db_string(), message, stack, url, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_session_errors(&self, session_id: i64) -> StorageResult<Vec<CrawlErrorRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, kind, message, stack, url, occurred_at
             FROM crawl_errors WHERE session_id = ?1 ORDER BY id",
        )?;

        let errors = stmt
            .query_map(params![session_id], |row| {
                Ok(CrawlErrorRecord {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    kind: ErrorKind::from_db_string(&row.get::<_, String>(2)?)
                        .unwrap_or(ErrorKind::Unknown),
                    message: row.get(3)?,
                    stack: row.get(4)?,
                    url: row.get(5)?,
                    occurred_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(errors)
    }

    fn error_summary(&self, session_id: i64) -> StorageResult<Vec<(ErrorKind, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, COUNT(*) FROM crawl_errors
             WHERE session_id = ?1 GROUP BY kind ORDER BY COUNT(*) DESC, kind",
        )?;

        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(kind, count)| {
                (
                    ErrorKind::from_db_string(&kind).unwrap_or(ErrorKind::Unknown),
                    count as u64,
                )
            })
            .collect())
    }
}

impl RecordRepository for SqliteStorage {
    fn upsert_record(&mut self, record: &StructuredRecord) -> StorageResult<UpsertOutcome> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM records WHERE id = ?1",
                params![record.id],
                |row| row.get(0),
            )
            .optional()?;

        let fields_json = serde_json::to_string(&record.fields)?;
        let images_json = serde_json::to_string(&record.image_urls)?;
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "INSERT INTO records (id, url, collection_key, title, fields_json, image_urls_json, first_seen_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                collection_key = excluded.collection_key,
                title = excluded.title,
                fields_json = excluded.fields_json,
                image_urls_json = excluded.image_urls_json,
                updated_at = excluded.updated_at",
            params![
                record.id,
                record.url,
                record.collection_key,
                record.title,
                fields_json,
                images_json,
                now
            ],
        )?;

        Ok(if exists.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    fn find_by_id(&self, id: &str) -> StorageResult<Option<StructuredRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, url, collection_key, title, fields_json, image_urls_json
                 FROM records WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, url, collection_key, title, fields_json, images_json)) = row else {
            return Ok(None);
        };

        let fields: BTreeMap<String, String> = serde_json::from_str(&fields_json)?;
        let image_urls: Vec<String> = serde_json::from_str(&images_json)?;

        Ok(Some(StructuredRecord {
            id,
            url,
            collection_key,
            title,
            fields,
            image_urls,
        }))
    }

    fn count_records(&self, collection_key: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection_key = ?1",
            params![collection_key],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn insert_images(&mut self, images: &[ImageRecord]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO record_images (record_id, source_url, local_path, status, error, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(record_id, source_url) DO UPDATE SET
                    local_path = excluded.local_path,
                    status = excluded.status,
                    error = excluded.error,
                    fetched_at = excluded.fetched_at",
            )?;
            for image in images {
                written += stmt.execute(params![
                    image.record_id,
                    image.source_url,
                    image.local_path,
                    image.status.to_db_string(),
                    image.error,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn get_images(&self, record_id: &str) -> StorageResult<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, source_url, local_path, status, error
             FROM record_images WHERE record_id = ?1 ORDER BY id",
        )?;

        let images = stmt
            .query_map(params![record_id], |row| {
                Ok(ImageRecord {
                    record_id: row.get(0)?,
                    source_url: row.get(1)?,
                    local_path: row.get(2)?,
                    status: ImageStatus::from_db_string(&row.get::<_, String>(3)?)
                        .unwrap_or(ImageStatus::Failed),
                    error: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(images)
    }
}
