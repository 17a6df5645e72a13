//! Challenge mitigation
//!
//! Runs when the detector flags a page as a challenge. The session backs off
//! passively, behaves like a reader for a while, and then, if a solving
//! service is configured, hands the page to it under a hard timeout.
//! Mitigation never fails the crawl: every problem ends as `Unsolved`.

use crate::config::ChallengeConfig;
use crate::crawler::jitter::JitterSource;
use crate::crawler::session::{BrowserSession, FetchedPage, HumanProfile};
use crate::crawler::solver::SolvingService;
use std::sync::Arc;
use std::time::Duration;

/// Result of a mitigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MitigationResult {
    Solved,
    Unsolved,
}

/// Reacts to challenge pages
pub struct ChallengeMitigator {
    passive_min_ms: u64,
    passive_max_ms: u64,
    profile: HumanProfile,
    solver: Option<Arc<dyn SolvingService>>,
    solver_timeout: Duration,
}

impl ChallengeMitigator {
    pub fn new(
        config: &ChallengeConfig,
        profile: HumanProfile,
        solver: Option<Arc<dyn SolvingService>>,
    ) -> Self {
        Self {
            passive_min_ms: config.passive_backoff_min_ms,
            passive_max_ms: config.passive_backoff_max_ms,
            profile,
            solver,
            solver_timeout: Duration::from_secs(config.solver_timeout_secs),
        }
    }

    pub fn has_solver(&self) -> bool {
        self.solver.is_some()
    }

    /// Tries to get past the challenge served in `page`
    pub async fn mitigate(
        &self,
        session: &mut dyn BrowserSession,
        page: &FetchedPage,
        jitter: &dyn JitterSource,
    ) -> MitigationResult {
        let backoff = jitter.duration_ms(self.passive_min_ms, self.passive_max_ms);
        tracing::warn!(
            "Challenge served for {} (session {}), backing off {:?}",
            page.url,
            session.id(),
            backoff
        );
        tokio::time::sleep(backoff).await;

        session.simulate_human(&self.profile, jitter).await;

        let Some(solver) = &self.solver else {
            tracing::info!("No solving service configured, challenge for {} unsolved", page.url);
            return MitigationResult::Unsolved;
        };

        match tokio::time::timeout(self.solver_timeout, solver.solve(page)).await {
            Ok(Ok(true)) => {
                tracing::info!("Challenge for {} solved", page.url);
                MitigationResult::Solved
            }
            Ok(Ok(false)) => {
                tracing::warn!("Solving service could not clear challenge for {}", page.url);
                MitigationResult::Unsolved
            }
            Ok(Err(e)) => {
                tracing::warn!("Solving service error for {}: {}", page.url, e);
                MitigationResult::Unsolved
            }
            Err(_) => {
                tracing::warn!(
                    "Solving service timed out after {:?} for {}",
                    self.solver_timeout,
                    page.url
                );
                MitigationResult::Unsolved
            }
        }
    }
}
