//! Classification of a single navigation
//!
//! | Condition | Result |
//! |-----------|--------|
//! | transport error | transient |
//! | HTTP 429 | transient, rate-limit backoff |
//! | HTTP 5xx | transient, policy backoff |
//! | other non-2xx | terminal |
//! | 2xx + clean page | success |
//! | 2xx + rate-limit phrase | transient, rate-limit backoff |
//! | 2xx + challenge, mitigation solved | transient, retried at once |
//! | 2xx + challenge, mitigation unsolved | terminal |
//!
//! `classify` keeps a solved challenge distinct so a caller that owns the
//! session can reload the page on it before giving the session up.

use crate::crawler::detector::{MarkerSet, PageVerdict};
use crate::crawler::jitter::JitterSource;
use crate::crawler::mitigation::{ChallengeMitigator, MitigationResult};
use crate::crawler::retry::Attempt;
use crate::crawler::session::{BrowserSession, FetchedPage, TransportError};
use crate::state::{is_transient_http, FetchStatus};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Result of classifying one navigation
#[derive(Debug)]
pub enum Inspection {
    Checked(Attempt<FetchedPage>),
    /// The session just cleared a challenge; the page should be loaded again
    ChallengeSolved,
}

impl Inspection {
    /// Retry decision for callers that do not reload on the same session
    pub fn into_attempt(self) -> Attempt<FetchedPage> {
        match self {
            Self::Checked(attempt) => attempt,
            Self::ChallengeSolved => Attempt::throttled(
                FetchStatus::Challenged,
                "challenge solved, retrying",
                Duration::ZERO,
            ),
        }
    }
}

/// Turns navigation results into retry decisions
pub struct PageInspector {
    markers: MarkerSet,
    mitigator: ChallengeMitigator,
    rate_limit_backoff: Duration,
    jitter: Arc<dyn JitterSource>,
}

impl PageInspector {
    pub fn new(
        markers: MarkerSet,
        mitigator: ChallengeMitigator,
        rate_limit_backoff: Duration,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        Self {
            markers,
            mitigator,
            rate_limit_backoff,
            jitter,
        }
    }

    pub fn jitter(&self) -> &dyn JitterSource {
        self.jitter.as_ref()
    }

    /// Classifies one navigation made through `session`
    ///
    /// A challenge is mitigated on the same session before this returns.
    pub async fn inspect(
        &self,
        session: &mut dyn BrowserSession,
        navigation: Result<FetchedPage, TransportError>,
    ) -> Attempt<FetchedPage> {
        self.classify(session, navigation).await.into_attempt()
    }

    /// Like [`inspect`](Self::inspect), but reports a solved challenge
    /// instead of turning it into a retry
    pub async fn classify(
        &self,
        session: &mut dyn BrowserSession,
        navigation: Result<FetchedPage, TransportError>,
    ) -> Inspection {
        let page = match navigation {
            Ok(page) => page,
            Err(e) => {
                return Inspection::Checked(Attempt::transient(
                    FetchStatus::TransportError,
                    e.to_string(),
                ))
            }
        };

        let status = page.status;
        if status == 429 {
            return Inspection::Checked(Attempt::throttled(
                FetchStatus::Blocked,
                "http 429: Too Many Requests",
                self.rate_limit_backoff(),
            ));
        }
        if is_transient_http(status) {
            return Inspection::Checked(Attempt::transient(
                FetchStatus::HttpError(status),
                reason(status),
            ));
        }
        if !page.is_success() {
            return Inspection::Checked(Attempt::terminal(
                FetchStatus::HttpError(status),
                reason(status),
            ));
        }

        match self.markers.detect(&page.body) {
            PageVerdict::Clean => Inspection::Checked(Attempt::Success(page)),
            PageVerdict::RateLimited => Inspection::Checked(Attempt::throttled(
                FetchStatus::Blocked,
                "rate limit marker on page",
                self.rate_limit_backoff(),
            )),
            PageVerdict::Challenged => {
                match self
                    .mitigator
                    .mitigate(session, &page, self.jitter.as_ref())
                    .await
                {
                    MitigationResult::Solved => Inspection::ChallengeSolved,
                    MitigationResult::Unsolved => Inspection::Checked(Attempt::terminal(
                        FetchStatus::Challenged,
                        "challenge not solved",
                    )),
                }
            }
        }
    }

    fn rate_limit_backoff(&self) -> Duration {
        let base = self.rate_limit_backoff.as_millis() as u64;
        // Up to 25% extra so parallel sessions do not resume in lockstep
        self.jitter.duration_ms(base, base + base / 4)
    }
}

fn reason(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown Status")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChallengeConfig;
    use crate::crawler::jitter::SequenceJitter;
    use crate::crawler::session::{HumanProfile, TransportErrorKind};
    use crate::crawler::solver::{SolverError, SolvingService};
    use async_trait::async_trait;

    struct StubSession;

    #[async_trait]
    impl BrowserSession for StubSession {
        fn id(&self) -> u64 {
            1
        }

        async fn navigate(&mut self, _url: &str) -> Result<FetchedPage, TransportError> {
            unreachable!()
        }

        async fn close(self: Box<Self>) {}
    }

    fn inspector() -> PageInspector {
        let markers = MarkerSet::new(
            &["verify you are human".to_string()],
            &[],
            &["too many requests".to_string()],
        )
        .unwrap();
        let challenge = ChallengeConfig {
            passive_backoff_min_ms: 0,
            passive_backoff_max_ms: 0,
            ..ChallengeConfig::default()
        };
        PageInspector::new(
            markers,
            ChallengeMitigator::new(&challenge, HumanProfile::none(), None),
            Duration::from_secs(60),
            Arc::new(SequenceJitter::zero()),
        )
    }

    fn page(status: u16, body: &str) -> Result<FetchedPage, TransportError> {
        Ok(FetchedPage {
            url: "https://listings.example.com/item/1".to_string(),
            final_url: "https://listings.example.com/item/1".to_string(),
            status,
            body: body.to_string(),
            session_id: 1,
        })
    }

    #[tokio::test]
    async fn test_clean_page_succeeds() {
        let result = inspector()
            .inspect(&mut StubSession, page(200, "<h1>Flat</h1>"))
            .await;
        assert!(matches!(result, Attempt::Success(_)));
    }

    #[tokio::test]
    async fn test_forbidden_is_terminal() {
        let result = inspector().inspect(&mut StubSession, page(403, "")).await;
        match result {
            Attempt::Terminal { status, detail } => {
                assert_eq!(status, FetchStatus::HttpError(403));
                assert_eq!(detail, "Forbidden");
            }
            other => panic!("expected terminal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        for code in [502, 503, 520] {
            let result = inspector().inspect(&mut StubSession, page(code, "")).await;
            assert!(
                matches!(result, Attempt::Transient { status: FetchStatus::HttpError(c), backoff: None, .. } if c == code),
                "{} should be transient",
                code
            );
        }
    }

    #[tokio::test]
    async fn test_too_many_requests_backs_off() {
        let result = inspector().inspect(&mut StubSession, page(429, "")).await;
        assert!(matches!(
            result,
            Attempt::Transient {
                status: FetchStatus::Blocked,
                backoff: Some(d),
                ..
            } if d == Duration::from_secs(60)
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_phrase_backs_off() {
        let result = inspector()
            .inspect(&mut StubSession, page(200, "Too many requests"))
            .await;
        assert!(matches!(
            result,
            Attempt::Transient {
                status: FetchStatus::Blocked,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unsolved_challenge_is_terminal() {
        let result = inspector()
            .inspect(&mut StubSession, page(200, "Please verify you are human"))
            .await;
        assert!(matches!(
            result,
            Attempt::Terminal {
                status: FetchStatus::Challenged,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_solved_challenge_is_reported_distinctly() {
        struct ClearingSolver;

        #[async_trait]
        impl SolvingService for ClearingSolver {
            async fn solve(&self, _page: &FetchedPage) -> Result<bool, SolverError> {
                Ok(true)
            }
        }

        let markers = MarkerSet::new(&["verify you are human".to_string()], &[], &[]).unwrap();
        let challenge = ChallengeConfig {
            passive_backoff_min_ms: 0,
            passive_backoff_max_ms: 0,
            ..ChallengeConfig::default()
        };
        let inspector = PageInspector::new(
            markers,
            ChallengeMitigator::new(&challenge, HumanProfile::none(), Some(Arc::new(ClearingSolver))),
            Duration::from_secs(60),
            Arc::new(SequenceJitter::zero()),
        );

        let inspection = inspector
            .classify(&mut StubSession, page(200, "Please verify you are human"))
            .await;
        assert!(matches!(inspection, Inspection::ChallengeSolved));
        assert!(matches!(
            inspection.into_attempt(),
            Attempt::Transient {
                status: FetchStatus::Challenged,
                backoff: Some(d),
                ..
            } if d == Duration::ZERO
        ));
    }

    #[tokio::test]
    async fn test_transport_error_is_transient() {
        let err = TransportError::new(TransportErrorKind::Timeout, "timed out");
        let result = inspector().inspect(&mut StubSession, Err(err)).await;
        assert!(matches!(
            result,
            Attempt::Transient {
                status: FetchStatus::TransportError,
                ..
            }
        ));
    }
}
