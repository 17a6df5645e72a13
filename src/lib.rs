//! Listing-Harvest: a resilient two-phase listing site crawler
//!
//! This crate walks the paginated listing views of a catalog-style site to
//! discover item URLs, then fetches every discovered item and persists a
//! structured record for it. Each fetch is wrapped in challenge detection,
//! bounded retries and pacing so the crawl survives rate limiting and
//! anti-automation interstitials, and all progress is kept in SQLite so an
//! interrupted run resumes where it stopped.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for crawl operations
///
/// Only conditions that must abort a run travel as this error. Failures that
/// are scoped to a single item are reported as values instead.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid CSS selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] crawler::TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crawl session {0} not found")]
    SessionNotFound(i64),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector in config: {0}")]
    InvalidSelector(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, CrawlSummary, ItemFetcher};
pub use state::{ErrorKind, FetchOutcome, FetchStatus, SessionStatus, UrlOutcome};
