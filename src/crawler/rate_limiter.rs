//! Global request ceiling for the pooled-session strategy
//!
//! A sliding window of recent request start times. `acquire` waits until the
//! window has room, then records the new request.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window request limiter shared by all pooled sessions
#[derive(Debug)]
pub struct RequestRateLimiter {
    max_requests: usize,
    window: Duration,
    started: Mutex<VecDeque<Instant>>,
}

impl RequestRateLimiter {
    /// Creates a limiter allowing `max_requests` starts per `window`
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            window,
            started: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Waits for a free slot and claims it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut started = self.started.lock().await;
                let now = Instant::now();

                while let Some(&oldest) = started.front() {
                    if now.duration_since(oldest) >= self.window {
                        started.pop_front();
                    } else {
                        break;
                    }
                }

                if started.len() < self.max_requests {
                    started.push_back(now);
                    return;
                }

                // Window is full: wait until the oldest entry expires
                match started.front() {
                    Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };

            tracing::debug!("Request ceiling reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests started within the current window
    pub async fn in_window(&self) -> usize {
        let started = self.started.lock().await;
        let now = Instant::now();
        started
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count()
    }
}
