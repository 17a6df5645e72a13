//! Crawl coordinator - two-phase orchestration
//!
//! A run moves through `Init → ComputeResumePoint → Discovery → Extraction →
//! Finalize`:
//!
//! - Discovery walks listing pages one at a time and appends their item
//!   links to the discovery cache. It is skipped when the cache already
//!   holds the page target.
//! - Extraction takes the unprocessed cached URLs in cache order and feeds
//!   them through the selected fetch strategy, each wrapped in the retry
//!   controller. Every URL is marked processed exactly once.
//! - Finalize persists the counters and closes the session. Failing to
//!   close is logged and does not change the returned summary.
//!
//! Item-scoped failures (including panics) are recorded and counted; only
//! storage failures abort a run.

use crate::config::Config;
use crate::crawler::detector::MarkerSet;
use crate::crawler::extract::{ExtractionService, SelectorExtractor};
use crate::crawler::fetcher::ItemFetcher;
use crate::crawler::images::ImageDownloader;
use crate::crawler::inspect::PageInspector;
use crate::crawler::jitter::{JitterSource, RandomJitter};
use crate::crawler::listing::{HtmlListingSource, ListingSource};
use crate::crawler::mitigation::ChallengeMitigator;
use crate::crawler::progress::{CrawlPhase, ProgressReporter, ProgressUpdate};
use crate::crawler::retry::{run_attempts, RetryPolicy};
use crate::crawler::session::{HttpSessionFactory, HumanProfile, SessionFactory};
use crate::crawler::solver::{HttpSolvingService, SolvingService};
use crate::state::{ErrorKind, FetchOutcome, FetchStatus, SessionStatus};
use crate::storage::{
    CacheStats, ImageRecord, ImageStatus, SessionCounters, Storage, StorageError,
    StructuredRecord, UpsertOutcome,
};
use crate::CrawlError;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Storage handle shared by the coordinator and its callers
pub type SharedStorage = Arc<Mutex<dyn Storage + Send>>;

/// Final report of a crawl run
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub session_id: i64,
    pub collection_key: String,
    pub status: SessionStatus,
    pub counters: SessionCounters,
    /// Listing pages walked by this run (0 when discovery was skipped)
    pub pages_walked: u32,
    pub elapsed: Duration,
    pub error_message: Option<String>,
}

/// How the phases ended when no fatal error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseEnd {
    Finished,
    Interrupted,
}

/// Result of processing one item, before it is persisted
#[derive(Debug)]
pub struct ItemReport {
    pub url: String,
    pub outcome: FetchOutcome,
    pub record: Option<StructuredRecord>,
    pub images: Vec<ImageRecord>,
    /// Message of a panic caught at the item boundary
    pub panic: Option<String>,
}

impl ItemReport {
    fn failed(url: String, outcome: FetchOutcome) -> Self {
        Self {
            url,
            outcome,
            record: None,
            images: Vec::new(),
            panic: None,
        }
    }
}

/// Everything the coordinator talks to besides storage
pub struct Collaborators {
    pub fetcher: ItemFetcher,
    pub listing: Arc<dyn ListingSource>,
    pub extractor: Arc<dyn ExtractionService>,
    /// Present when image downloads are enabled
    pub images: Option<ImageDownloader>,
    pub jitter: Arc<dyn JitterSource>,
}

impl Collaborators {
    /// Builds the HTTP-backed collaborators described by `config`
    pub fn from_config(config: &Config) -> Result<Self, CrawlError> {
        let factory: Arc<dyn SessionFactory> = Arc::new(HttpSessionFactory::new(&config.fetch));
        Self::with_factory(config, factory, Arc::new(RandomJitter))
    }

    /// Builds the collaborators around a custom session factory and jitter
    pub fn with_factory(
        config: &Config,
        factory: Arc<dyn SessionFactory>,
        jitter: Arc<dyn JitterSource>,
    ) -> Result<Self, CrawlError> {
        let solver = HttpSolvingService::from_config(&config.challenge)?
            .map(|solver| Arc::new(solver) as Arc<dyn SolvingService>);
        let mitigator = ChallengeMitigator::new(
            &config.challenge,
            HumanProfile::from_config(&config.fetch.isolated),
            solver,
        );
        let inspector = Arc::new(PageInspector::new(
            MarkerSet::from_config(&config.detection)?,
            mitigator,
            Duration::from_millis(config.retry.rate_limit_backoff_ms),
            jitter.clone(),
        ));

        let listing = HtmlListingSource::new(&config.target, factory.clone(), inspector.clone())?;
        let images = if config.crawl.download_images {
            Some(ImageDownloader::new(&config.fetch, &config.output.image_dir)?)
        } else {
            None
        };

        Ok(Self {
            fetcher: ItemFetcher::from_config(&config.fetch, factory, inspector),
            listing: Arc::new(listing),
            extractor: Arc::new(SelectorExtractor::from_config(&config.extraction)?),
            images,
            jitter,
        })
    }
}

/// First listing page to fetch given the records already stored
///
/// `floor(existing_items / items_per_page) + 1`
pub fn compute_resume_page(existing_items: u64, items_per_page: u32) -> u32 {
    let per_page = u64::from(items_per_page.max(1));
    let page = existing_items / per_page + 1;
    u32::try_from(page).unwrap_or(u32::MAX)
}

/// Main crawl coordinator
pub struct Coordinator {
    config: Arc<Config>,
    storage: SharedStorage,
    fetcher: ItemFetcher,
    listing: Arc<dyn ListingSource>,
    extractor: Arc<dyn ExtractionService>,
    images: Option<ImageDownloader>,
    jitter: Arc<dyn JitterSource>,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
    config_hash: String,
}

impl Coordinator {
    /// Creates a coordinator with the HTTP-backed collaborators
    ///
    /// # Arguments
    ///
    /// * `config` - The crawl configuration
    /// * `storage` - Open storage handle
    /// * `config_hash` - Hash of the configuration, stored on the session
    /// * `shutdown` - Flipped to `true` to stop dispatching new items
    pub fn new(
        config: Config,
        storage: SharedStorage,
        config_hash: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, CrawlError> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::with_collaborators(
            config,
            storage,
            collaborators,
            config_hash,
            shutdown,
        ))
    }

    pub fn with_collaborators(
        config: Config,
        storage: SharedStorage,
        collaborators: Collaborators,
        config_hash: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            config: Arc::new(config),
            storage,
            fetcher: collaborators.fetcher,
            listing: collaborators.listing,
            extractor: collaborators.extractor,
            images: collaborators.images,
            jitter: collaborators.jitter,
            retry,
            shutdown,
            config_hash: config_hash.into(),
        }
    }

    /// Runs both phases and closes the session
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - The run reached Finalize, whatever its status
    /// * `Err(CrawlError)` - The session could not be created
    pub async fn run(&self) -> Result<CrawlSummary, CrawlError> {
        let started = Instant::now();
        let collection_key = self.config.crawl.collection_key.clone();

        let session_id = self.with_storage(|storage| {
            storage.create_session(
                &collection_key,
                self.config.crawl.max_items,
                &self.config_hash,
            )
        })?;
        tracing::info!(
            "Starting crawl session {} for collection '{}' ({} strategy)",
            session_id,
            collection_key,
            self.fetcher.kind()
        );

        let mut progress =
            ProgressReporter::start(Duration::from_millis(self.config.progress.interval_ms));
        let mut counters = SessionCounters::default();
        let mut pages_walked = 0;

        let result = self
            .run_phases(session_id, &mut counters, &mut pages_walked, &progress)
            .await;

        progress.update_stats(ProgressUpdate {
            phase: Some(CrawlPhase::Finished),
            counters: Some(counters),
            ..ProgressUpdate::default()
        });
        progress.stop().await;
        self.fetcher.shutdown().await;
        self.listing.close().await;

        let (status, error_message) = match result {
            Ok(PhaseEnd::Finished) => (SessionStatus::Completed, None),
            Ok(PhaseEnd::Interrupted) => {
                tracing::warn!("Crawl session {} interrupted", session_id);
                (SessionStatus::Interrupted, None)
            }
            Err(e) => {
                tracing::error!("Crawl session {} failed: {}", session_id, e);
                (SessionStatus::Failed, Some(e.to_string()))
            }
        };

        self.finalize(session_id, status, &counters, error_message.as_deref());

        let summary = CrawlSummary {
            session_id,
            collection_key,
            status,
            counters,
            pages_walked,
            elapsed: started.elapsed(),
            error_message,
        };
        tracing::info!(
            "Crawl session {} {}: {} new, {} updated, {} failed in {:?}",
            summary.session_id,
            summary.status.to_db_string(),
            counters.new,
            counters.updated,
            counters.failed,
            summary.elapsed
        );
        Ok(summary)
    }

    async fn run_phases(
        &self,
        session_id: i64,
        counters: &mut SessionCounters,
        pages_walked: &mut u32,
        progress: &ProgressReporter,
    ) -> Result<PhaseEnd, CrawlError> {
        let key = self.config.crawl.collection_key.as_str();
        let max_pages = self.config.crawl.max_pages;

        let discovery_complete =
            self.with_storage(|storage| storage.is_discovery_complete(key, max_pages))?;

        if discovery_complete {
            tracing::info!(
                "Discovery cache already covers {} page(s) of '{}', skipping discovery",
                max_pages,
                key
            );
        } else {
            let start_page = self.resume_page()?;
            progress.update_stats(ProgressUpdate {
                phase: Some(CrawlPhase::Discovery),
                ..ProgressUpdate::default()
            });

            let end = self
                .discover(session_id, start_page, counters, pages_walked, progress)
                .await?;
            if end == PhaseEnd::Interrupted {
                return Ok(PhaseEnd::Interrupted);
            }
            self.check_discovery_yield()?;
        }

        self.extract(session_id, counters, progress).await
    }

    /// Page to start discovery from
    ///
    /// An explicit start page wins. Otherwise the page derived from stored
    /// records, but never a page the cache has already seen.
    fn resume_page(&self) -> Result<u32, CrawlError> {
        if let Some(page) = self.config.crawl.start_page {
            tracing::info!("Starting discovery at explicit page {}", page);
            return Ok(page);
        }

        let key = self.config.crawl.collection_key.as_str();
        let existing = self.with_storage(|storage| storage.count_records(key))?;
        let stats = self.with_storage(|storage| storage.get_stats(key))?;

        let from_records = compute_resume_page(existing, self.config.target.items_per_page);
        let page = from_records.max(stats.last_page_seen.saturating_add(1));
        tracing::info!(
            "Resuming discovery at page {} ({} stored record(s), last cached page {})",
            page,
            existing,
            stats.last_page_seen
        );
        Ok(page)
    }

    async fn discover(
        &self,
        session_id: i64,
        start_page: u32,
        counters: &mut SessionCounters,
        pages_walked: &mut u32,
        progress: &ProgressReporter,
    ) -> Result<PhaseEnd, CrawlError> {
        let key = self.config.crawl.collection_key.as_str();
        let max_pages = self.config.crawl.max_pages;
        let listing: &dyn ListingSource = self.listing.as_ref();

        for page in start_page..=max_pages {
            if self.shutdown_requested() {
                return Ok(PhaseEnd::Interrupted);
            }

            let result =
                run_attempts(&self.retry, self.jitter.as_ref(), move |_| {
                    listing.fetch_listing(key, page)
                })
                .await;

            let Some(listing_page) = result.value else {
                let outcome = result.outcome;
                let message = format!(
                    "listing page {} failed after {} attempt(s): {}",
                    page,
                    outcome.attempts_used,
                    outcome.error_note().unwrap_or_default()
                );
                tracing::warn!("{}, stopping discovery", message);
                counters.pages_failed += 1;
                let kind = outcome.status.error_kind().unwrap_or(ErrorKind::Unknown);
                self.with_storage(|storage| {
                    storage.record_error(session_id, kind, &message, None, None)
                })?;
                break;
            };

            let inserted = self.with_storage(|storage| {
                storage.save_batch(&listing_page.item_urls, page, key)
            })?;
            *pages_walked += 1;
            tracing::info!(
                "Listing page {}: {} link(s), {} new",
                page,
                listing_page.item_urls.len(),
                inserted
            );

            let stats = self.with_storage(|storage| storage.get_stats(key))?;
            progress.update_stats(ProgressUpdate {
                pages_walked: Some(*pages_walked),
                urls_discovered: Some(stats.total),
                ..ProgressUpdate::default()
            });

            if !listing_page.has_next {
                tracing::info!("No page after {}, discovery finished", page);
                break;
            }
        }

        Ok(PhaseEnd::Finished)
    }

    /// Warns when the cache holds well under what the walked pages promise
    fn check_discovery_yield(&self) -> Result<(), CrawlError> {
        let key = self.config.crawl.collection_key.as_str();
        let stats: CacheStats = self.with_storage(|storage| storage.get_stats(key))?;
        let expected =
            u64::from(stats.last_page_seen) * u64::from(self.config.target.items_per_page);

        if expected > 0 && stats.total * 5 < expected * 4 {
            tracing::warn!(
                "Discovery found {} URL(s) for '{}', below 80% of the {} expected from {} page(s)",
                stats.total,
                key,
                expected,
                stats.last_page_seen
            );
        }
        Ok(())
    }

    async fn extract(
        &self,
        session_id: i64,
        counters: &mut SessionCounters,
        progress: &ProgressReporter,
    ) -> Result<PhaseEnd, CrawlError> {
        let key = self.config.crawl.collection_key.as_str();
        let mut pending = self.with_storage(|storage| storage.get_unprocessed_urls(key))?;
        if let Some(max_items) = self.config.crawl.max_items {
            pending.truncate(max_items as usize);
        }

        counters.found = pending.len() as u64;
        progress.update_stats(ProgressUpdate {
            phase: Some(CrawlPhase::Extraction),
            items_total: Some(counters.found),
            counters: Some(*counters),
            ..ProgressUpdate::default()
        });
        tracing::info!(
            "Extracting {} item(s) with up to {} in flight",
            pending.len(),
            self.fetcher.parallelism()
        );

        let parallelism = self.fetcher.parallelism();
        let persist_every = u64::from(self.config.crawl.persist_every.max(1));
        let mut queue = pending.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut shutdown = self.shutdown.clone();
        let mut watching = true;
        let mut interrupted = false;

        loop {
            while !interrupted && in_flight.len() < parallelism {
                if *shutdown.borrow() {
                    interrupted = true;
                    break;
                }
                match queue.next() {
                    Some(discovered) => in_flight.push(self.guarded_item(discovered.url)),
                    None => break,
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let report = tokio::select! {
                Some(report) = in_flight.next() => report,
                changed = shutdown.changed(), if watching && !interrupted => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => {
                            tracing::info!(
                                "Shutdown requested, finishing {} in-flight item(s)",
                                in_flight.len()
                            );
                            interrupted = true;
                        }
                        Ok(()) => {}
                        Err(_) => watching = false,
                    }
                    continue;
                }
            };

            self.settle_item(session_id, report, counters)?;
            progress.update_stats(ProgressUpdate {
                counters: Some(*counters),
                ..ProgressUpdate::default()
            });

            if counters.completed() % persist_every == 0 {
                self.with_storage(|storage| storage.update_counters(session_id, counters))?;
            }
        }

        Ok(if interrupted {
            PhaseEnd::Interrupted
        } else {
            PhaseEnd::Finished
        })
    }

    /// Processes one item, turning a panic into a failed report
    async fn guarded_item(&self, url: String) -> ItemReport {
        match AssertUnwindSafe(self.process_item(url.clone()))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Panic while processing {}: {}", url, message);
                ItemReport {
                    outcome: FetchOutcome::failed(FetchStatus::Panicked, 0, message.clone()),
                    url,
                    record: None,
                    images: Vec::new(),
                    panic: Some(message),
                }
            }
        }
    }

    async fn process_item(&self, url: String) -> ItemReport {
        let fetcher = &self.fetcher;
        let target = url.as_str();
        let result = run_attempts(&self.retry, self.jitter.as_ref(), move |_| {
            fetcher.fetch_item(target)
        })
        .await;

        let Some(page) = result.value else {
            return ItemReport::failed(url, result.outcome);
        };

        let key = self.config.crawl.collection_key.as_str();
        let Some(mut record) = self.extractor.extract_record(&page, key) else {
            let outcome = FetchOutcome::failed(
                FetchStatus::ExtractionFailed,
                result.outcome.attempts_used,
                "no record on page",
            );
            return ItemReport::failed(url, outcome);
        };
        record.image_urls = self.extractor.extract_image_urls(&page);

        let images = match &self.images {
            Some(downloader) if !record.image_urls.is_empty() => {
                downloader.download_all(&record).await
            }
            _ => Vec::new(),
        };

        ItemReport {
            url,
            outcome: result.outcome,
            record: Some(record),
            images,
            panic: None,
        }
    }

    /// Persists one item report and updates the counters
    fn settle_item(
        &self,
        session_id: i64,
        report: ItemReport,
        counters: &mut SessionCounters,
    ) -> Result<(), CrawlError> {
        let mut storage = self.lock_storage()?;

        if let Some(panic) = &report.panic {
            counters.failed += 1;
            storage.record_error(
                session_id,
                ErrorKind::Unknown,
                "panic while processing item",
                Some(panic),
                Some(&report.url),
            )?;
            let note = report
                .outcome
                .error_note()
                .unwrap_or_else(|| "panicked".to_string());
            storage.mark_processed(&report.url, false, Some(&note))?;
            return Ok(());
        }

        match (&report.record, report.outcome.is_success()) {
            (Some(record), true) => {
                match storage.upsert_record(record)? {
                    UpsertOutcome::Inserted => counters.new += 1,
                    UpsertOutcome::Updated => counters.updated += 1,
                }
                if !report.images.is_empty() {
                    storage.insert_images(&report.images)?;
                    for image in &report.images {
                        match image.status {
                            ImageStatus::Downloaded => counters.images_ok += 1,
                            ImageStatus::Failed => counters.images_failed += 1,
                        }
                    }
                }
                storage.mark_processed(&report.url, true, None)?;
                tracing::debug!(
                    "Stored record {} from {} after {} attempt(s)",
                    record.id,
                    report.url,
                    report.outcome.attempts_used
                );
            }
            _ => {
                counters.failed += 1;
                let note = report
                    .outcome
                    .error_note()
                    .unwrap_or_else(|| "no record".to_string());
                let kind = report
                    .outcome
                    .status
                    .error_kind()
                    .unwrap_or(ErrorKind::Unknown);
                tracing::warn!(
                    "Item {} failed after {} attempt(s): {}",
                    report.url,
                    report.outcome.attempts_used,
                    note
                );
                storage.record_error(session_id, kind, &note, None, Some(&report.url))?;
                storage.mark_processed(&report.url, false, Some(&note))?;
            }
        }

        Ok(())
    }

    /// Persists the final counters and closes the session, best effort
    fn finalize(
        &self,
        session_id: i64,
        status: SessionStatus,
        counters: &SessionCounters,
        error_message: Option<&str>,
    ) {
        if let Err(e) = self.with_storage(|storage| storage.update_counters(session_id, counters))
        {
            tracing::warn!("Failed to persist counters of session {}: {}", session_id, e);
        }
        if let Err(e) = self.with_storage(|storage| {
            storage.close_session(session_id, status, error_message)
        }) {
            tracing::warn!(
                "Failed to close session {} as {}: {}",
                session_id,
                status.to_db_string(),
                e
            );
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn lock_storage(&self) -> Result<MutexGuard<'_, dyn Storage + Send + 'static>, CrawlError> {
        self.storage
            .lock()
            .map_err(|_| {
                CrawlError::from(StorageError::Database("storage lock poisoned".to_string()))
            })
    }

    fn with_storage<T>(
        &self,
        f: impl FnOnce(&mut (dyn Storage + Send)) -> Result<T, StorageError>,
    ) -> Result<T, CrawlError> {
        let mut storage = self.lock_storage()?;
        Ok(f(&mut *storage)?)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
