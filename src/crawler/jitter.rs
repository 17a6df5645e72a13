//! Randomness used for delays and human-like pacing
//!
//! Every randomized wait in the crawler draws from a `JitterSource`, so tests
//! can swap the thread RNG for a fixed sequence.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Source of random values for delays
pub trait JitterSource: Send + Sync {
    /// Returns a value in `min..=max`
    ///
    /// When `min >= max`, returns `min`.
    fn sample(&self, min: u64, max: u64) -> u64;

    /// Samples a duration in milliseconds from `min_ms..=max_ms`
    fn duration_ms(&self, min_ms: u64, max_ms: u64) -> Duration {
        Duration::from_millis(self.sample(min_ms, max_ms))
    }
}

/// Jitter backed by the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// Deterministic jitter cycling through a fixed list of offsets
///
/// Each value is added to `min` and clamped to `max`.
#[derive(Debug)]
pub struct SequenceJitter {
    offsets: Vec<u64>,
    next: AtomicUsize,
}

impl SequenceJitter {
    pub fn new(offsets: Vec<u64>) -> Self {
        Self {
            offsets,
            next: AtomicUsize::new(0),
        }
    }

    /// Always returns the lower bound
    pub fn zero() -> Self {
        Self::new(vec![0])
    }
}

impl JitterSource for SequenceJitter {
    fn sample(&self, min: u64, max: u64) -> u64 {
        if min >= max || self.offsets.is_empty() {
            return min;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.offsets.len();
        min.saturating_add(self.offsets[idx]).min(max)
    }
}
