//! Outcome types passed between the retry controller and the orchestrator
//!
//! `FetchOutcome` is never persisted. What is persisted is its projection
//! onto a `UrlOutcome` in the discovery cache and, for failures, an
//! `ErrorKind` in the crawl error audit trail.

use std::fmt;

/// Final result stored on a discovered URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlOutcome {
    /// Not processed yet
    Unset,
    /// A record was extracted and persisted
    Success,
    /// The attempt sequence ended without a record
    Failure,
}

impl UrlOutcome {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "unset" => Some(Self::Unset),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// Terminal status of one item's attempt sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    /// Page fetched, record extracted and persisted
    Ok,
    /// The target answered with a soft block (rate limit phrase or HTTP 429)
    Blocked,
    /// An anti-automation challenge was served and not solved
    Challenged,
    /// Non-success HTTP status
    HttpError(u16),
    /// The extraction collaborator returned no record
    ExtractionFailed,
    /// DNS, connect, timeout or reset
    TransportError,
    /// Processing the item panicked
    Panicked,
}

impl FetchStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Maps a failed status onto the audit taxonomy
    ///
    /// Returns None for `Ok`.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Ok => None,
            Self::Blocked => Some(ErrorKind::RateLimited),
            Self::Challenged => Some(ErrorKind::Challenged),
            Self::HttpError(code) if is_transient_http(*code) => Some(ErrorKind::HttpTransient),
            Self::HttpError(_) => Some(ErrorKind::HttpTerminal),
            Self::ExtractionFailed => Some(ErrorKind::ExtractionFailed),
            Self::TransportError => Some(ErrorKind::Transport),
            Self::Panicked => Some(ErrorKind::Unknown),
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Blocked => f.write_str("blocked"),
            Self::Challenged => f.write_str("challenged"),
            Self::HttpError(code) => write!(f, "http {}", code),
            Self::ExtractionFailed => f.write_str("extraction failed"),
            Self::TransportError => f.write_str("transport error"),
            Self::Panicked => f.write_str("panicked"),
        }
    }
}

/// Returns true for HTTP statuses worth retrying (server-side trouble)
pub fn is_transient_http(code: u16) -> bool {
    (500..=599).contains(&code)
}

/// The single terminal outcome of an item's attempt sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub status: FetchStatus,

    /// Number of times the fetch function ran (1 ..= max_retries + 1),
    /// or 0 when processing panicked
    pub attempts_used: u32,

    /// Human-readable detail of the last failure, if any
    pub detail: Option<String>,
}

impl FetchOutcome {
    pub fn ok(attempts_used: u32) -> Self {
        Self {
            status: FetchStatus::Ok,
            attempts_used,
            detail: None,
        }
    }

    pub fn failed(status: FetchStatus, attempts_used: u32, detail: impl Into<String>) -> Self {
        Self {
            status,
            attempts_used,
            detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_ok()
    }

    /// Short note stored on the discovered URL when the sequence failed
    pub fn error_note(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        Some(match &self.detail {
            Some(detail) => format!("{}: {}", self.status, detail),
            None => self.status.to_string(),
        })
    }
}

/// Error taxonomy for the crawl error audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// DNS, timeout or connection reset (retryable)
    Transport,
    /// HTTP status that is never retried (403 and other 4xx)
    HttpTerminal,
    /// HTTP status retried up to the configured cap (5xx)
    HttpTransient,
    /// Anti-automation challenge that mitigation did not clear
    Challenged,
    /// Soft block that outlasted the backoff budget
    RateLimited,
    /// Extraction collaborator produced no record
    ExtractionFailed,
    /// Storage failure (aborts the run)
    Persistence,
    /// Anything else caught at the item boundary
    Unknown,
}

impl ErrorKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::HttpTerminal => "http_terminal",
            Self::HttpTransient => "http_transient",
            Self::Challenged => "challenged",
            Self::RateLimited => "rate_limited",
            Self::ExtractionFailed => "extraction_failed",
            Self::Persistence => "persistence",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "transport" => Some(Self::Transport),
            "http_terminal" => Some(Self::HttpTerminal),
            "http_transient" => Some(Self::HttpTransient),
            "challenged" => Some(Self::Challenged),
            "rate_limited" => Some(Self::RateLimited),
            "extraction_failed" => Some(Self::ExtractionFailed),
            "persistence" => Some(Self::Persistence),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Returns true if errors of this kind are retried by the controller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport | Self::HttpTransient | Self::RateLimited | Self::Challenged
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
