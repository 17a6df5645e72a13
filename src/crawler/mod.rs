//! Crawler module for fetching and processing listing sites
//!
//! This module contains the core crawling logic, including:
//! - Browser sessions and the two item fetch strategies
//! - Challenge and rate-limit detection, and challenge mitigation
//! - The retry/backoff controller
//! - Listing pagination, record extraction and image downloads
//! - Progress reporting and the two-phase coordinator

mod coordinator;
mod detector;
mod extract;
mod fetcher;
mod images;
mod inspect;
mod jitter;
mod listing;
mod mitigation;
mod parser;
mod progress;
mod rate_limiter;
mod retry;
mod session;
mod solver;

pub use coordinator::{compute_resume_page, Collaborators, Coordinator, CrawlSummary, SharedStorage};
pub use detector::{MarkerSet, PageVerdict};
pub use extract::{record_id, ExtractionService, SelectorExtractor};
pub use fetcher::{IsolatedFetcher, ItemFetcher, PooledFetcher};
pub use images::ImageDownloader;
pub use inspect::{Inspection, PageInspector};
pub use jitter::{JitterSource, RandomJitter, SequenceJitter};
pub use listing::{HtmlListingSource, ListingPage, ListingSource};
pub use mitigation::{ChallengeMitigator, MitigationResult};
pub use progress::{CrawlPhase, ProgressReporter, ProgressSnapshot, ProgressUpdate};
pub use rate_limiter::RequestRateLimiter;
pub use retry::{attempt, run_attempts, Attempt, RetryPolicy, RetryResult};
pub use session::{
    BrowserSession, FetchedPage, HttpSession, HttpSessionFactory, HumanProfile, SessionFactory,
    TransportError, TransportErrorKind,
};
pub use solver::{HttpSolvingService, SolverError, SolvingService};

use crate::config::Config;
use crate::storage::open_storage;
use crate::CrawlError;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Runs a complete crawl against the database named in the configuration
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open (or create) the SQLite database
/// 2. Build the HTTP-backed collaborators
/// 3. Run discovery and extraction
/// 4. Close the crawl session
///
/// # Arguments
///
/// * `config` - The crawl configuration
/// * `config_hash` - Hash of the configuration file
/// * `shutdown` - Set to `true` to interrupt the crawl
///
/// # Returns
///
/// * `Ok(CrawlSummary)` - The run was finalized (check its status)
/// * `Err(CrawlError)` - The run could not start
pub async fn crawl(
    config: Config,
    config_hash: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<CrawlSummary, CrawlError> {
    let storage = open_storage(Path::new(&config.output.database_path))?;
    let storage: SharedStorage = Arc::new(Mutex::new(storage));
    let coordinator = Coordinator::new(config, storage, config_hash, shutdown)?;
    coordinator.run().await
}
