//! Item fetch strategies
//!
//! Two interchangeable ways of fetching an item page, selected once per run:
//!
//! - **Pooled**: a bounded set of long-lived sessions shared by concurrent
//!   fetches, under a global requests-per-minute ceiling. A session is
//!   replaced after a fixed number of uses, after a transport failure, or
//!   after an unsolved challenge.
//! - **Isolated**: one fetch at a time, each in a brand-new session that
//!   scrolls and dwells like a reader and is torn down before returning.
//!   A challenge cleared by mitigation is followed by one reload on the same
//!   session, since a fresh session would be challenged again.
//!   Consecutive fetches are separated by a long randomized delay.
//!
//! Both return one classified attempt per call; retrying is the caller's
//! job.

use crate::config::{FetchConfig, FetchStrategyKind};
use crate::crawler::inspect::{Inspection, PageInspector};
use crate::crawler::rate_limiter::RequestRateLimiter;
use crate::crawler::retry::Attempt;
use crate::crawler::session::{
    BrowserSession, FetchedPage, HumanProfile, SessionFactory, TransportError,
};
use crate::state::FetchStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// The fetch strategy of a run
pub enum ItemFetcher {
    Pooled(PooledFetcher),
    Isolated(IsolatedFetcher),
}

impl ItemFetcher {
    /// Builds the strategy named in the configuration
    pub fn from_config(
        config: &FetchConfig,
        factory: Arc<dyn SessionFactory>,
        inspector: Arc<PageInspector>,
    ) -> Self {
        match config.strategy {
            FetchStrategyKind::Pooled => Self::Pooled(PooledFetcher::new(
                factory,
                inspector,
                config.pooled.max_concurrent_sessions as usize,
                RequestRateLimiter::per_minute(config.pooled.max_requests_per_minute),
                config.pooled.session_max_uses,
            )),
            FetchStrategyKind::Isolated => Self::Isolated(IsolatedFetcher::new(
                factory,
                inspector,
                HumanProfile::from_config(&config.isolated),
                config.isolated.min_delay_ms,
                config.isolated.max_delay_ms,
            )),
        }
    }

    pub fn kind(&self) -> FetchStrategyKind {
        match self {
            Self::Pooled(_) => FetchStrategyKind::Pooled,
            Self::Isolated(_) => FetchStrategyKind::Isolated,
        }
    }

    /// How many items the driver may have in flight
    pub fn parallelism(&self) -> usize {
        match self {
            Self::Pooled(pooled) => pooled.max_sessions,
            Self::Isolated(_) => 1,
        }
    }

    /// Fetches and classifies one item page
    pub async fn fetch_item(&self, url: &str) -> Attempt<FetchedPage> {
        match self {
            Self::Pooled(pooled) => pooled.fetch_item(url).await,
            Self::Isolated(isolated) => isolated.fetch_item(url).await,
        }
    }

    /// Closes every session still open
    pub async fn shutdown(&self) {
        if let Self::Pooled(pooled) = self {
            pooled.shutdown().await;
        }
    }
}

struct PooledSession {
    session: Box<dyn BrowserSession>,
    uses: u32,
}

/// Shared long-lived sessions with concurrency and rate ceilings
pub struct PooledFetcher {
    factory: Arc<dyn SessionFactory>,
    inspector: Arc<PageInspector>,
    limiter: RequestRateLimiter,
    permits: Semaphore,
    idle: Mutex<Vec<PooledSession>>,
    max_sessions: usize,
    max_uses: u32,
}

impl PooledFetcher {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        inspector: Arc<PageInspector>,
        max_sessions: usize,
        limiter: RequestRateLimiter,
        max_uses: u32,
    ) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            factory,
            inspector,
            limiter,
            permits: Semaphore::new(max_sessions),
            idle: Mutex::new(Vec::new()),
            max_sessions,
            max_uses: max_uses.max(1),
        }
    }

    pub async fn fetch_item(&self, url: &str) -> Attempt<FetchedPage> {
        let Ok(_permit) = self.permits.acquire().await else {
            return Attempt::terminal(FetchStatus::TransportError, "session pool is shut down");
        };

        let mut pooled = match self.checkout().await {
            Ok(pooled) => pooled,
            Err(e) => return Attempt::transient(FetchStatus::TransportError, e.to_string()),
        };

        self.limiter.acquire().await;
        let navigation = pooled.session.navigate(url).await;
        pooled.uses += 1;

        let transport_failed = navigation.is_err();
        let attempt = self
            .inspector
            .inspect(pooled.session.as_mut(), navigation)
            .await;

        let burned = matches!(
            attempt,
            Attempt::Terminal {
                status: FetchStatus::Challenged,
                ..
            }
        );

        if transport_failed || burned || pooled.uses >= self.max_uses {
            tracing::debug!(
                "Retiring session {} after {} use(s)",
                pooled.session.id(),
                pooled.uses
            );
            pooled.session.close().await;
        } else {
            self.checkin(pooled);
        }

        attempt
    }

    async fn checkout(&self) -> Result<PooledSession, TransportError> {
        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        match reused {
            Some(pooled) => Ok(pooled),
            None => Ok(PooledSession {
                session: self.factory.open().await?,
                uses: 0,
            }),
        }
    }

    fn checkin(&self, pooled: PooledSession) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(pooled);
        }
    }

    /// Sessions currently parked in the pool
    pub fn idle_sessions(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    pub async fn shutdown(&self) {
        self.permits.close();
        let sessions: Vec<PooledSession> = match self.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for pooled in sessions {
            pooled.session.close().await;
        }
    }
}

/// One fresh session per item, strictly serial, paced
pub struct IsolatedFetcher {
    factory: Arc<dyn SessionFactory>,
    inspector: Arc<PageInspector>,
    profile: HumanProfile,
    min_delay_ms: u64,
    max_delay_ms: u64,
    last_finished: tokio::sync::Mutex<Option<Instant>>,
}

impl IsolatedFetcher {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        inspector: Arc<PageInspector>,
        profile: HumanProfile,
        min_delay_ms: u64,
        max_delay_ms: u64,
    ) -> Self {
        Self {
            factory,
            inspector,
            profile,
            min_delay_ms,
            max_delay_ms,
            last_finished: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn fetch_item(&self, url: &str) -> Attempt<FetchedPage> {
        // Held for the whole fetch, which keeps the strategy serial
        let mut last_finished = self.last_finished.lock().await;

        if let Some(finished) = *last_finished {
            let delay = self
                .inspector
                .jitter()
                .duration_ms(self.min_delay_ms, self.max_delay_ms);
            let remaining = delay.saturating_sub(finished.elapsed());
            if remaining > Duration::ZERO {
                tracing::debug!("Pacing isolated fetch of {} by {:?}", url, remaining);
                tokio::time::sleep(remaining).await;
            }
        }

        let attempt = self.fetch_once(url).await;
        *last_finished = Some(Instant::now());
        attempt
    }

    async fn fetch_once(&self, url: &str) -> Attempt<FetchedPage> {
        let mut session = match self.factory.open().await {
            Ok(session) => session,
            Err(e) => return Attempt::transient(FetchStatus::TransportError, e.to_string()),
        };

        let mut navigation = session.navigate(url).await;
        let mut reloaded = false;
        let attempt = loop {
            if matches!(&navigation, Ok(page) if page.is_success()) {
                session
                    .simulate_human(&self.profile, self.inspector.jitter())
                    .await;
            }

            match self.inspector.classify(session.as_mut(), navigation).await {
                Inspection::ChallengeSolved if !reloaded => {
                    tracing::debug!(
                        "Reloading {} in session {} after solved challenge",
                        url,
                        session.id()
                    );
                    reloaded = true;
                    navigation = session.navigate(url).await;
                }
                inspection => break inspection.into_attempt(),
            }
        };

        session.close().await;
        attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChallengeConfig;
    use crate::crawler::detector::MarkerSet;
    use crate::crawler::jitter::SequenceJitter;
    use crate::crawler::mitigation::ChallengeMitigator;
    use crate::crawler::retry::{run_attempts, RetryPolicy};
    use crate::crawler::session::TransportErrorKind;
    use crate::crawler::solver::{SolverError, SolvingService};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct StubSession {
        id: u64,
        counters: Arc<Counters>,
        /// The first navigation of the session serves a challenge
        challenge_first: bool,
        navigations: usize,
    }

    #[async_trait]
    impl BrowserSession for StubSession {
        fn id(&self) -> u64 {
            self.id
        }

        async fn navigate(&mut self, url: &str) -> Result<FetchedPage, TransportError> {
            if url.contains("unreachable") {
                return Err(TransportError::new(TransportErrorKind::Connect, "refused"));
            }
            self.navigations += 1;
            let body = if self.challenge_first && self.navigations == 1 {
                "<p>Please solve the captcha</p>"
            } else {
                "<h1>Flat</h1>"
            };
            Ok(FetchedPage {
                url: url.to_string(),
                final_url: url.to_string(),
                status: 200,
                body: body.to_string(),
                session_id: self.id,
            })
        }

        async fn close(self: Box<Self>) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StubFactory {
        counters: Arc<Counters>,
        challenge_first: bool,
    }

    #[async_trait]
    impl SessionFactory for StubFactory {
        async fn open(&self) -> Result<Box<dyn BrowserSession>, TransportError> {
            let id = self.counters.opened.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            Ok(Box::new(StubSession {
                id,
                counters: self.counters.clone(),
                challenge_first: self.challenge_first,
                navigations: 0,
            }))
        }
    }

    fn inspector() -> Arc<PageInspector> {
        let markers = MarkerSet::new(&["captcha".to_string()], &[], &[]).unwrap();
        let mitigator =
            ChallengeMitigator::new(&ChallengeConfig::default(), HumanProfile::none(), None);
        Arc::new(PageInspector::new(
            markers,
            mitigator,
            Duration::from_secs(60),
            Arc::new(SequenceJitter::zero()),
        ))
    }

    fn stub_factory() -> (Arc<Counters>, Arc<dyn SessionFactory>) {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(StubFactory {
            counters: counters.clone(),
            challenge_first: false,
        });
        (counters, factory)
    }

    struct ClearingSolver;

    #[async_trait]
    impl SolvingService for ClearingSolver {
        async fn solve(&self, _page: &FetchedPage) -> Result<bool, SolverError> {
            Ok(true)
        }
    }

    fn solving_inspector() -> Arc<PageInspector> {
        let markers = MarkerSet::new(&["captcha".to_string()], &[], &[]).unwrap();
        let challenge = ChallengeConfig {
            passive_backoff_min_ms: 0,
            passive_backoff_max_ms: 0,
            ..ChallengeConfig::default()
        };
        let mitigator =
            ChallengeMitigator::new(&challenge, HumanProfile::none(), Some(Arc::new(ClearingSolver)));
        Arc::new(PageInspector::new(
            markers,
            mitigator,
            Duration::from_secs(60),
            Arc::new(SequenceJitter::zero()),
        ))
    }

    #[tokio::test]
    async fn test_pooled_reuses_then_recycles_sessions() {
        let (counters, factory) = stub_factory();
        let fetcher = PooledFetcher::new(
            factory,
            inspector(),
            1,
            RequestRateLimiter::per_minute(1000),
            2,
        );

        for i in 0..5 {
            let attempt = fetcher
                .fetch_item(&format!("https://listings.example.com/item/{}", i))
                .await;
            assert!(matches!(attempt, Attempt::Success(_)));
        }

        // Two uses per session: 5 fetches need 3 sessions, 2 retired so far
        assert_eq!(counters.opened.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
        assert_eq!(fetcher.idle_sessions(), 1);

        fetcher.shutdown().await;
        assert_eq!(counters.closed.load(Ordering::SeqCst), 3);
        assert_eq!(fetcher.idle_sessions(), 0);
    }

    #[tokio::test]
    async fn test_pooled_retires_session_after_transport_error() {
        let (counters, factory) = stub_factory();
        let fetcher = PooledFetcher::new(
            factory,
            inspector(),
            2,
            RequestRateLimiter::per_minute(1000),
            100,
        );

        let attempt = fetcher.fetch_item("https://unreachable.example.com/").await;
        assert!(matches!(
            attempt,
            Attempt::Transient {
                status: FetchStatus::TransportError,
                ..
            }
        ));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.idle_sessions(), 0);
    }

    #[tokio::test]
    async fn test_pooled_after_shutdown_is_terminal() {
        let (_, factory) = stub_factory();
        let fetcher = PooledFetcher::new(
            factory,
            inspector(),
            1,
            RequestRateLimiter::per_minute(1000),
            10,
        );
        fetcher.shutdown().await;

        let attempt = fetcher.fetch_item("https://listings.example.com/item/1").await;
        assert!(matches!(attempt, Attempt::Terminal { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_isolated_opens_fresh_session_and_paces() {
        let (counters, factory) = stub_factory();
        let fetcher = IsolatedFetcher::new(factory, inspector(), HumanProfile::none(), 20_000, 20_000);
        let started = Instant::now();

        for i in 0..3 {
            let attempt = fetcher
                .fetch_item(&format!("https://listings.example.com/item/{}", i))
                .await;
            assert!(matches!(attempt, Attempt::Success(_)));
        }

        assert_eq!(counters.opened.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 3);

        // No delay before the first fetch, 20s before each of the others
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(40));
        assert!(waited < Duration::from_secs(41));
    }

    #[tokio::test]
    async fn test_isolated_reloads_on_session_that_solved_challenge() {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(StubFactory {
            counters: counters.clone(),
            challenge_first: true,
        });
        let fetcher = IsolatedFetcher::new(factory, solving_inspector(), HumanProfile::none(), 0, 0);

        let result = run_attempts(&RetryPolicy::immediate(3), &SequenceJitter::zero(), |_| {
            fetcher.fetch_item("https://listings.example.com/item/1")
        })
        .await;

        assert!(result.outcome.is_success());
        assert_eq!(result.outcome.attempts_used, 1);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert!(result.value.unwrap().body.contains("Flat"));
    }

    #[tokio::test]
    async fn test_pooled_retries_on_session_that_solved_challenge() {
        let counters = Arc::new(Counters::default());
        let factory = Arc::new(StubFactory {
            counters: counters.clone(),
            challenge_first: true,
        });
        let fetcher = PooledFetcher::new(
            factory,
            solving_inspector(),
            1,
            RequestRateLimiter::per_minute(1000),
            100,
        );

        let result = run_attempts(&RetryPolicy::immediate(3), &SequenceJitter::zero(), |_| {
            fetcher.fetch_item("https://listings.example.com/item/1")
        })
        .await;

        assert!(result.outcome.is_success());
        assert_eq!(result.outcome.attempts_used, 2);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parallelism_follows_strategy() {
        let (_, factory) = stub_factory();
        let mut config = FetchConfig::default();
        config.pooled.max_concurrent_sessions = 4;

        let pooled = ItemFetcher::from_config(&config, factory.clone(), inspector());
        assert_eq!(pooled.kind(), FetchStrategyKind::Pooled);
        assert_eq!(pooled.parallelism(), 4);

        config.strategy = FetchStrategyKind::Isolated;
        let isolated = ItemFetcher::from_config(&config, factory, inspector());
        assert_eq!(isolated.kind(), FetchStrategyKind::Isolated);
        assert_eq!(isolated.parallelism(), 1);
    }
}
