//! Browser sessions
//!
//! A `BrowserSession` is one isolated browsing identity: its own cookie jar,
//! its own user agent, its own connection pool. Fetch strategies open
//! sessions through a `SessionFactory` and decide how long each one lives.
//!
//! The shipped implementation drives plain HTTP through `reqwest`. Anything
//! that can navigate to a URL and hand back status and markup (a remote
//! headless browser, a recorded fixture) can implement the same traits.

use crate::config::{FetchConfig, IsolatedConfig};
use crate::crawler::jitter::JitterSource;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Connect => f.write_str("connect"),
            Self::Other => f.write_str("transport"),
        }
    }
}

/// The request never produced an HTTP response (DNS, connect, timeout, reset)
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string())
    }
}

/// A page as returned by a navigation
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub status: u16,
    pub body: String,
    /// Session that produced the page
    pub session_id: u64,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Timing profile of the scripted human interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanProfile {
    pub dwell_min_ms: u64,
    pub dwell_max_ms: u64,
    pub scroll_steps: u32,
    pub scroll_pause_min_ms: u64,
    pub scroll_pause_max_ms: u64,
}

impl HumanProfile {
    pub fn from_config(config: &IsolatedConfig) -> Self {
        Self {
            dwell_min_ms: config.dwell_min_ms,
            dwell_max_ms: config.dwell_max_ms,
            scroll_steps: config.scroll_steps,
            scroll_pause_min_ms: config.scroll_pause_min_ms,
            scroll_pause_max_ms: config.scroll_pause_max_ms,
        }
    }

    /// No interaction at all
    pub fn none() -> Self {
        Self {
            dwell_min_ms: 0,
            dwell_max_ms: 0,
            scroll_steps: 0,
            scroll_pause_min_ms: 0,
            scroll_pause_max_ms: 0,
        }
    }
}

/// One browsing identity
#[async_trait]
pub trait BrowserSession: Send {
    fn id(&self) -> u64;

    /// Loads a URL and returns whatever the server answered
    ///
    /// HTTP error statuses are returned as pages; only failures that never
    /// reached an HTTP response are errors.
    async fn navigate(&mut self, url: &str) -> Result<FetchedPage, TransportError>;

    /// Scrolls through the current page and dwells on it
    async fn simulate_human(&mut self, profile: &HumanProfile, jitter: &dyn JitterSource) {
        for step in 0..profile.scroll_steps {
            let pause =
                jitter.duration_ms(profile.scroll_pause_min_ms, profile.scroll_pause_max_ms);
            tracing::trace!("Session {} scroll step {} ({:?})", self.id(), step + 1, pause);
            tokio::time::sleep(pause).await;
        }
        let dwell = jitter.duration_ms(profile.dwell_min_ms, profile.dwell_max_ms);
        tracing::trace!("Session {} dwelling for {:?}", self.id(), dwell);
        tokio::time::sleep(dwell).await;
    }

    /// Tears the session down
    async fn close(self: Box<Self>);
}

/// Opens new sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, TransportError>;
}

/// HTTP-backed session with its own cookie jar
pub struct HttpSession {
    id: u64,
    client: Client,
    user_agent: String,
}

impl HttpSession {
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn navigate(&mut self, url: &str) -> Result<FetchedPage, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;

        tracing::debug!("Session {} fetched {} ({})", self.id, url, status);

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            status,
            body,
            session_id: self.id,
        })
    }

    async fn close(self: Box<Self>) {
        tracing::trace!("Session {} closed", self.id);
    }
}

/// Builds `HttpSession`s, rotating through the configured user agents
pub struct HttpSessionFactory {
    user_agents: Vec<String>,
    request_timeout: Duration,
    connect_timeout: Duration,
    next_id: AtomicU64,
    next_agent: AtomicUsize,
}

impl HttpSessionFactory {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            user_agents: config.user_agents.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            next_id: AtomicU64::new(1),
            next_agent: AtomicUsize::new(0),
        }
    }

    fn pick_user_agent(&self) -> String {
        if self.user_agents.is_empty() {
            return format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        let idx = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        self.user_agents[idx].clone()
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, TransportError> {
        let user_agent = self.pick_user_agent();
        let client = Client::builder()
            .user_agent(user_agent.clone())
            .cookie_store(true)
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .redirect(Policy::limited(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Opened session {} as '{}'", id, user_agent);

        Ok(Box::new(HttpSession {
            id,
            client,
            user_agent,
        }))
    }
}
