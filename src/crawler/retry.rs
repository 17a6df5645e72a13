//! Retry/backoff controller
//!
//! Wraps one fetch operation with bounded retries. Each raw result is
//! classified as success, transient or terminal; transient results sleep for
//! a linearly growing, jittered delay before the next try, terminal results
//! stop immediately. Exactly one `FetchOutcome` comes out of every call.

use crate::config::RetryConfig;
use crate::crawler::jitter::JitterSource;
use crate::state::{FetchOutcome, FetchStatus};
use std::future::Future;
use std::time::Duration;

/// Bounds and delays of the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first try (total tries = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Added once per retry already made
    pub increment: Duration,
    /// Upper bound of the uniform jitter added to each delay
    pub jitter_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            increment: Duration::from_millis(config.increment_ms),
            jitter_max: Duration::from_millis(config.jitter_ms),
        }
    }

    /// A policy that retries without sleeping
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            increment: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    /// Delay before the retry following try number `retry_index` (0-based)
    ///
    /// `base + retry_index * increment + jitter`
    pub fn delay_for(&self, retry_index: u32, jitter: &dyn JitterSource) -> Duration {
        let linear = self.base_delay + self.increment.saturating_mul(retry_index);
        linear + jitter.duration_ms(0, self.jitter_max.as_millis() as u64)
    }
}

/// Classification of one raw fetch result
#[derive(Debug)]
pub enum Attempt<T> {
    /// Done; carry the value out
    Success(T),
    /// Worth another try
    ///
    /// `backoff` replaces the policy delay when set (rate limiting, a
    /// mitigation that already waited).
    Transient {
        status: FetchStatus,
        detail: String,
        backoff: Option<Duration>,
    },
    /// Never retried
    Terminal { status: FetchStatus, detail: String },
}

impl<T> Attempt<T> {
    pub fn transient(status: FetchStatus, detail: impl Into<String>) -> Self {
        Self::Transient {
            status,
            detail: detail.into(),
            backoff: None,
        }
    }

    pub fn throttled(status: FetchStatus, detail: impl Into<String>, backoff: Duration) -> Self {
        Self::Transient {
            status,
            detail: detail.into(),
            backoff: Some(backoff),
        }
    }

    pub fn terminal(status: FetchStatus, detail: impl Into<String>) -> Self {
        Self::Terminal {
            status,
            detail: detail.into(),
        }
    }

    /// Maps the success value, keeping failure classifications
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempt<U> {
        match self {
            Self::Success(value) => Attempt::Success(f(value)),
            Self::Transient {
                status,
                detail,
                backoff,
            } => Attempt::Transient {
                status,
                detail,
                backoff,
            },
            Self::Terminal { status, detail } => Attempt::Terminal { status, detail },
        }
    }
}

/// Outcome of a retry loop plus the value of the successful try, if any
#[derive(Debug)]
pub struct RetryResult<T> {
    pub outcome: FetchOutcome,
    pub value: Option<T>,
}

/// Runs `fetch` until it succeeds, fails terminally or exhausts the policy
///
/// `fetch` receives the 0-based try index and returns a raw result that
/// `classify` maps onto an [`Attempt`].
///
/// # Returns
///
/// Always a single `RetryResult`; when retries run out, the last transient
/// status becomes the final outcome.
pub async fn attempt<R, T, F, Fut, C>(
    policy: &RetryPolicy,
    jitter: &dyn JitterSource,
    mut fetch: F,
    mut classify: C,
) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = R>,
    C: FnMut(R) -> Attempt<T>,
{
    let mut try_index = 0;
    loop {
        let classified = classify(fetch(try_index).await);
        match settle(policy, jitter, try_index, classified) {
            Step::Done(result) => return result,
            Step::Wait(delay) => pause(delay).await,
        }
        try_index += 1;
    }
}

/// [`attempt`] for operations that classify their own result
pub async fn run_attempts<T, F, Fut>(
    policy: &RetryPolicy,
    jitter: &dyn JitterSource,
    op: F,
) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    attempt(policy, jitter, op, |classified: Attempt<T>| classified).await
}

enum Step<T> {
    Done(RetryResult<T>),
    Wait(Duration),
}

fn settle<T>(
    policy: &RetryPolicy,
    jitter: &dyn JitterSource,
    try_index: u32,
    classified: Attempt<T>,
) -> Step<T> {
    let attempts_used = try_index + 1;

    match classified {
        Attempt::Success(value) => Step::Done(RetryResult {
            outcome: FetchOutcome::ok(attempts_used),
            value: Some(value),
        }),
        Attempt::Terminal { status, detail } => {
            tracing::debug!(
                "Terminal {} after {} attempt(s): {}",
                status,
                attempts_used,
                detail
            );
            Step::Done(RetryResult {
                outcome: FetchOutcome::failed(status, attempts_used, detail),
                value: None,
            })
        }
        Attempt::Transient {
            status,
            detail,
            backoff,
        } => {
            if attempts_used > policy.max_retries {
                tracing::debug!(
                    "Giving up after {} attempt(s), last status {}: {}",
                    attempts_used,
                    status,
                    detail
                );
                return Step::Done(RetryResult {
                    outcome: FetchOutcome::failed(status, attempts_used, detail),
                    value: None,
                });
            }

            let delay = backoff.unwrap_or_else(|| policy.delay_for(try_index, jitter));
            tracing::debug!(
                "Transient {} ({}), retry {}/{} in {:?}",
                status,
                detail,
                attempts_used,
                policy.max_retries,
                delay
            );
            Step::Wait(delay)
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::jitter::SequenceJitter;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn classify_status(code: u16) -> Attempt<u16> {
        match code {
            200..=299 => Attempt::Success(code),
            500..=599 => Attempt::transient(FetchStatus::HttpError(code), "server error"),
            _ => Attempt::terminal(FetchStatus::HttpError(code), "client error"),
        }
    }

    #[test]
    fn test_delay_is_linear_plus_jitter() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            increment: Duration::from_millis(500),
            jitter_max: Duration::from_millis(100),
        };
        let jitter = SequenceJitter::new(vec![0, 40]);

        assert_eq!(policy.delay_for(0, &jitter), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1, &jitter), Duration::from_millis(1540));
        assert_eq!(policy.delay_for(2, &jitter), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_always_transient_uses_every_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result = attempt(
            &policy,
            &SequenceJitter::zero(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { 503u16 }
            },
            classify_status,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.outcome.attempts_used, 4);
        assert_eq!(result.outcome.status, FetchStatus::HttpError(503));
        assert!(result.value.is_none());
    }

    #[tokio::test]
    async fn test_terminal_short_circuits() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(5);

        let result = attempt(
            &policy,
            &SequenceJitter::zero(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { 403u16 }
            },
            classify_status,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.outcome.attempts_used, 1);
        assert_eq!(result.outcome.status, FetchStatus::HttpError(403));
    }

    #[tokio::test]
    async fn test_success_after_transient() {
        let policy = RetryPolicy::immediate(3);

        let result = attempt(
            &policy,
            &SequenceJitter::zero(),
            |try_index| async move {
                if try_index < 2 {
                    520u16
                } else {
                    200
                }
            },
            classify_status,
        )
        .await;

        assert!(result.outcome.is_success());
        assert_eq!(result.outcome.attempts_used, 3);
        assert_eq!(result.value, Some(200));
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_try() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(0);

        let result = attempt(
            &policy,
            &SequenceJitter::zero(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { 502u16 }
            },
            classify_status,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.outcome.status, FetchStatus::HttpError(502));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_tries() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_secs(5),
            increment: Duration::from_secs(5),
            jitter_max: Duration::ZERO,
        };
        let started = tokio::time::Instant::now();

        let result = attempt(
            &policy,
            &SequenceJitter::zero(),
            |_| async { 503u16 },
            classify_status,
        )
        .await;

        // 5s before the second try, 10s before the third
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(15) && waited < Duration::from_secs(16));
        assert_eq!(result.outcome.attempts_used, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_backoff_overrides_policy_delay() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_secs(5),
            increment: Duration::ZERO,
            jitter_max: Duration::ZERO,
        };
        let started = tokio::time::Instant::now();

        let result: RetryResult<()> = run_attempts(&policy, &SequenceJitter::zero(), |_| async {
            Attempt::throttled(FetchStatus::Blocked, "429", Duration::from_secs(60))
        })
        .await;

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(60) && waited < Duration::from_secs(61));
        assert_eq!(result.outcome.status, FetchStatus::Blocked);
        assert_eq!(result.outcome.attempts_used, 2);
    }
}
