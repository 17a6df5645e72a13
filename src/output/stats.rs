//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! discovery cache and session statistics from the storage layer.

use crate::state::ErrorKind;
use crate::storage::{CacheStats, CrawlSessionRecord, Storage};
use crate::CrawlError;
use std::fmt::Write;

/// Statistics of one collection
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub collection_key: String,

    /// Discovery cache counts
    pub cache: CacheStats,

    /// Records stored for the collection
    pub records: u64,

    /// Most recent sessions of any collection, newest first
    pub recent_sessions: Vec<CrawlSessionRecord>,

    /// Error counts per kind of the most recent session
    pub last_session_errors: Vec<(ErrorKind, u64)>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `collection_key` - Collection whose cache is summarized
/// * `session_limit` - How many recent sessions to include
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(CrawlError)` - Failed to query statistics
pub fn load_statistics(
    storage: &dyn Storage,
    collection_key: &str,
    session_limit: usize,
) -> Result<CrawlStatistics, CrawlError> {
    let cache = storage.get_stats(collection_key)?;
    let records = storage.count_records(collection_key)?;
    let recent_sessions = storage.recent_sessions(session_limit)?;

    let mut last_session_errors = match recent_sessions.first() {
        Some(session) => storage.error_summary(session.id)?,
        None => Vec::new(),
    };
    last_session_errors.sort_by(|a, b| b.1.cmp(&a.1));

    Ok(CrawlStatistics {
        collection_key: collection_key.to_string(),
        cache,
        records,
        recent_sessions,
        last_session_errors,
    })
}

/// Formats statistics as the report printed by `--stats`
pub fn render_statistics(stats: &CrawlStatistics) -> String {
    let mut out = String::new();
    let cache = &stats.cache;

    let _ = writeln!(out, "=== Crawl Statistics: {} ===\n", stats.collection_key);

    let _ = writeln!(out, "Discovery Cache:");
    let _ = writeln!(out, "  URLs cached: {}", cache.total);
    let _ = writeln!(out, "  Last listing page: {}", cache.last_page_seen);
    let _ = writeln!(out, "  Processed: {}", cache.processed);
    let _ = writeln!(out, "    Successful: {}", cache.successful);
    let _ = writeln!(out, "    Failed: {}", cache.failed);
    let _ = writeln!(out, "  Pending: {}", cache.pending());
    let _ = writeln!(out, "  Records stored: {}", stats.records);
    let _ = writeln!(out);

    if !stats.recent_sessions.is_empty() {
        let _ = writeln!(out, "Recent Sessions:");
        for session in &stats.recent_sessions {
            let counters = &session.counters;
            let _ = writeln!(
                out,
                "  #{} {} [{}] started {}: {} found, {} new, {} updated, {} failed",
                session.id,
                session.collection_key,
                session.status.to_db_string(),
                session.started_at,
                counters.found,
                counters.new,
                counters.updated,
                counters.failed
            );
            if let Some(message) = &session.error_message {
                let _ = writeln!(out, "      error: {}", message);
            }
        }
        let _ = writeln!(out);
    }

    if !stats.last_session_errors.is_empty() {
        let _ = writeln!(out, "Error Summary (last session):");
        for (kind, count) in &stats.last_session_errors {
            let _ = writeln!(out, "  {}: {}", kind, count);
        }
        let _ = writeln!(out);
    }

    let success_rate = if cache.processed > 0 {
        (cache.successful as f64 / cache.processed as f64) * 100.0
    } else {
        0.0
    };
    let _ = writeln!(
        out,
        "Success Rate: {:.1}% ({} / {} processed URLs)",
        success_rate, cache.successful, cache.processed
    );

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &CrawlStatistics) {
    print!("{}", render_statistics(stats));
}
