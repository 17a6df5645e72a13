//! Periodic progress reporting
//!
//! The reporter owns a small shared snapshot. The crawl merges partial
//! updates into it and a background task logs it on a fixed interval, so
//! the fetch path never waits on reporting.

use crate::storage::SessionCounters;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Phase the crawl is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrawlPhase {
    #[default]
    Starting,
    Discovery,
    Extraction,
    Finished,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Discovery => "discovery",
            Self::Extraction => "extraction",
            Self::Finished => "finished",
        })
    }
}

/// Point-in-time view of a crawl
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub phase: CrawlPhase,
    pub pages_walked: u32,
    pub urls_discovered: u64,
    /// Items queued for the extraction phase
    pub items_total: u64,
    pub counters: SessionCounters,
}

/// Partial update; `None` fields keep their current value
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressUpdate {
    pub phase: Option<CrawlPhase>,
    pub pages_walked: Option<u32>,
    pub urls_discovered: Option<u64>,
    pub items_total: Option<u64>,
    pub counters: Option<SessionCounters>,
}

struct Shared {
    snapshot: ProgressSnapshot,
    reports: u64,
}

/// Logs a progress line on a fixed interval until stopped
pub struct ProgressReporter {
    shared: Arc<Mutex<Shared>>,
    task: Option<JoinHandle<()>>,
    started: Instant,
}

impl ProgressReporter {
    /// Starts the reporting task
    ///
    /// The first report is emitted one full interval after start.
    pub fn start(interval: Duration) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            snapshot: ProgressSnapshot::default(),
            reports: 0,
        }));
        let started = Instant::now();

        let task_shared = shared.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(started + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let snapshot = match task_shared.lock() {
                    Ok(mut shared) => {
                        shared.reports += 1;
                        shared.snapshot
                    }
                    Err(_) => break,
                };
                log_snapshot(&snapshot, started.elapsed());
            }
        });

        Self {
            shared,
            task: Some(task),
            started,
        }
    }

    /// Merges a partial update into the snapshot
    pub fn update_stats(&self, update: ProgressUpdate) {
        let Ok(mut shared) = self.shared.lock() else {
            return;
        };
        let snapshot = &mut shared.snapshot;
        if let Some(phase) = update.phase {
            snapshot.phase = phase;
        }
        if let Some(pages) = update.pages_walked {
            snapshot.pages_walked = pages;
        }
        if let Some(urls) = update.urls_discovered {
            snapshot.urls_discovered = urls;
        }
        if let Some(total) = update.items_total {
            snapshot.items_total = total;
        }
        if let Some(counters) = update.counters {
            snapshot.counters = counters;
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared
            .lock()
            .map(|shared| shared.snapshot)
            .unwrap_or_default()
    }

    /// Number of periodic reports logged so far
    pub fn reports_emitted(&self) -> u64 {
        self.shared.lock().map(|shared| shared.reports).unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stops the reporting task and returns the final snapshot
    ///
    /// Later calls are no-ops.
    pub async fn stop(&mut self) -> ProgressSnapshot {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            tracing::debug!("Progress reporter stopped after {:?}", self.started.elapsed());
        }
        self.snapshot()
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn log_snapshot(snapshot: &ProgressSnapshot, elapsed: Duration) {
    match snapshot.phase {
        CrawlPhase::Discovery => tracing::info!(
            "[{}s] discovery: {} page(s), {} URL(s) cached",
            elapsed.as_secs(),
            snapshot.pages_walked,
            snapshot.urls_discovered
        ),
        _ => {
            let counters = &snapshot.counters;
            tracing::info!(
                "[{}s] {}: {}/{} items ({} new, {} updated, {} failed), images {} ok / {} failed",
                elapsed.as_secs(),
                snapshot.phase,
                counters.completed(),
                snapshot.items_total,
                counters.new,
                counters.updated,
                counters.failed,
                counters.images_ok,
                counters.images_failed
            );
        }
    }
}
