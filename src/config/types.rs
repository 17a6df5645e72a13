use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Main configuration structure for Listing-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub target: TargetConfig,
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    pub output: OutputConfig,
}

/// Where the listing views live and how to read them
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Scheme and host of the listing site (e.g. "https://listings.example.com")
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Path template of a listing page; `{collection}` and `{page}` are substituted
    #[serde(rename = "listing-path")]
    pub listing_path: String,

    /// CSS selector matching the item links on a listing page
    #[serde(rename = "item-link-selector")]
    pub item_link_selector: String,

    /// CSS selector of the "next page" control; when set, its absence ends discovery
    #[serde(rename = "next-page-selector", default)]
    pub next_page_selector: Option<String>,

    /// Expected number of items on a full listing page
    #[serde(rename = "items-per-page")]
    pub items_per_page: u32,
}

/// What to crawl in this run
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Collection key (city, category, ...) scoping discovery and items
    #[serde(rename = "collection-key")]
    pub collection_key: String,

    /// Number of listing pages to walk during discovery
    #[serde(rename = "max-pages")]
    pub max_pages: u32,

    /// Upper bound on items extracted in one run (unbounded when absent)
    #[serde(rename = "max-items", default)]
    pub max_items: Option<u32>,

    /// Download the images of every persisted record
    #[serde(rename = "download-images", default)]
    pub download_images: bool,

    /// Explicit first listing page; derived from persisted counts when absent
    #[serde(rename = "start-page", default)]
    pub start_page: Option<u32>,

    /// Persist the session counters after this many completed items
    #[serde(rename = "persist-every", default = "default_persist_every")]
    pub persist_every: u32,
}

/// Which fetch strategy drives the extraction phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategyKind {
    /// Long-lived sessions shared across items
    #[default]
    Pooled,
    /// A brand-new session for every item
    Isolated,
}

impl fmt::Display for FetchStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pooled => f.write_str("pooled"),
            Self::Isolated => f.write_str("isolated"),
        }
    }
}

/// Session and fetch strategy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub strategy: FetchStrategyKind,

    /// Whole-request timeout in seconds
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connect timeout in seconds
    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// User agents rotated across sessions
    #[serde(rename = "user-agents", default = "default_user_agents")]
    pub user_agents: Vec<String>,

    #[serde(default)]
    pub pooled: PooledConfig,

    #[serde(default)]
    pub isolated: IsolatedConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            strategy: FetchStrategyKind::default(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agents: default_user_agents(),
            pooled: PooledConfig::default(),
            isolated: IsolatedConfig::default(),
        }
    }
}

/// Ceilings of the pooled-session strategy
#[derive(Debug, Clone, Deserialize)]
pub struct PooledConfig {
    /// Maximum sessions alive (and fetches in flight) at once
    #[serde(rename = "max-concurrent-sessions", default = "default_max_sessions")]
    pub max_concurrent_sessions: u32,

    /// Global request ceiling across all sessions
    #[serde(rename = "max-requests-per-minute", default = "default_rpm")]
    pub max_requests_per_minute: u32,

    /// A session is torn down and replaced after this many navigations
    #[serde(rename = "session-max-uses", default = "default_session_max_uses")]
    pub session_max_uses: u32,
}

impl Default for PooledConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: default_max_sessions(),
            max_requests_per_minute: default_rpm(),
            session_max_uses: default_session_max_uses(),
        }
    }
}

/// Pacing and human-behavior profile of the isolated-session strategy
#[derive(Debug, Clone, Deserialize)]
pub struct IsolatedConfig {
    /// Lower bound of the randomized delay between two items
    #[serde(rename = "min-delay-ms", default = "default_isolated_min_delay")]
    pub min_delay_ms: u64,

    /// Upper bound of the randomized delay between two items
    #[serde(rename = "max-delay-ms", default = "default_isolated_max_delay")]
    pub max_delay_ms: u64,

    #[serde(rename = "dwell-min-ms", default = "default_dwell_min")]
    pub dwell_min_ms: u64,

    #[serde(rename = "dwell-max-ms", default = "default_dwell_max")]
    pub dwell_max_ms: u64,

    /// Number of simulated scroll steps per page
    #[serde(rename = "scroll-steps", default = "default_scroll_steps")]
    pub scroll_steps: u32,

    #[serde(rename = "scroll-pause-min-ms", default = "default_scroll_pause_min")]
    pub scroll_pause_min_ms: u64,

    #[serde(rename = "scroll-pause-max-ms", default = "default_scroll_pause_max")]
    pub scroll_pause_max_ms: u64,
}

impl Default for IsolatedConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_isolated_min_delay(),
            max_delay_ms: default_isolated_max_delay(),
            dwell_min_ms: default_dwell_min(),
            dwell_max_ms: default_dwell_max(),
            scroll_steps: default_scroll_steps(),
            scroll_pause_min_ms: default_scroll_pause_min(),
            scroll_pause_max_ms: default_scroll_pause_max(),
        }
    }
}

/// Retry/backoff controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = max-retries + 1)
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(rename = "base-delay-ms", default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Added to the delay for every further retry (linear growth)
    #[serde(rename = "increment-ms", default = "default_increment")]
    pub increment_ms: u64,

    /// Upper bound of the random jitter added to each delay
    #[serde(rename = "jitter-ms", default = "default_jitter")]
    pub jitter_ms: u64,

    /// Backoff applied when the target signals a soft block
    #[serde(rename = "rate-limit-backoff-ms", default = "default_rate_limit_backoff")]
    pub rate_limit_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            increment_ms: default_increment(),
            jitter_ms: default_jitter(),
            rate_limit_backoff_ms: default_rate_limit_backoff(),
        }
    }
}

/// Site-specific blocking markers injected into the detector
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Case-insensitive text markers of a challenge interstitial
    #[serde(rename = "challenge-markers", default = "default_challenge_markers")]
    pub challenge_markers: Vec<String>,

    /// CSS selectors whose presence marks a challenge (e.g. a verify button)
    #[serde(rename = "challenge-selectors", default)]
    pub challenge_selectors: Vec<String>,

    /// Case-insensitive phrases of a soft rate-limit block
    #[serde(rename = "rate-limit-markers", default = "default_rate_limit_markers")]
    pub rate_limit_markers: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            challenge_markers: default_challenge_markers(),
            challenge_selectors: Vec::new(),
            rate_limit_markers: default_rate_limit_markers(),
        }
    }
}

/// Challenge mitigation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeConfig {
    #[serde(rename = "passive-backoff-min-ms", default = "default_passive_min")]
    pub passive_backoff_min_ms: u64,

    #[serde(rename = "passive-backoff-max-ms", default = "default_passive_max")]
    pub passive_backoff_max_ms: u64,

    /// Base URL of an external solving service; mitigation is backoff-only without it
    #[serde(rename = "solver-endpoint", default)]
    pub solver_endpoint: Option<String>,

    #[serde(rename = "solver-api-key", default)]
    pub solver_api_key: Option<String>,

    /// Bound on the whole solving call, polling included
    #[serde(rename = "solver-timeout-secs", default = "default_solver_timeout")]
    pub solver_timeout_secs: u64,

    #[serde(rename = "solver-poll-interval-ms", default = "default_solver_poll")]
    pub solver_poll_interval_ms: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            passive_backoff_min_ms: default_passive_min(),
            passive_backoff_max_ms: default_passive_max(),
            solver_endpoint: None,
            solver_api_key: None,
            solver_timeout_secs: default_solver_timeout(),
            solver_poll_interval_ms: default_solver_poll(),
        }
    }
}

/// Selectors used by the built-in extraction service
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Selector of the item title; an item page without it yields no record
    #[serde(rename = "title-selector")]
    pub title_selector: String,

    /// Selector of the item images
    #[serde(rename = "image-selector", default)]
    pub image_selector: Option<String>,

    /// Additional named fields, each mapped to a CSS selector
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Progress reporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressConfig {
    #[serde(rename = "interval-ms", default = "default_progress_interval")]
    pub interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_progress_interval(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory receiving downloaded images
    #[serde(rename = "image-dir", default = "default_image_dir")]
    pub image_dir: String,
}

fn default_persist_every() -> u32 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
    ]
}

fn default_max_sessions() -> u32 {
    3
}

fn default_rpm() -> u32 {
    30
}

fn default_session_max_uses() -> u32 {
    25
}

fn default_isolated_min_delay() -> u64 {
    20_000
}

fn default_isolated_max_delay() -> u64 {
    120_000
}

fn default_dwell_min() -> u64 {
    3_000
}

fn default_dwell_max() -> u64 {
    8_000
}

fn default_scroll_steps() -> u32 {
    4
}

fn default_scroll_pause_min() -> u64 {
    400
}

fn default_scroll_pause_max() -> u64 {
    1_500
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    5_000
}

fn default_increment() -> u64 {
    5_000
}

fn default_jitter() -> u64 {
    1_000
}

fn default_rate_limit_backoff() -> u64 {
    60_000
}

fn default_challenge_markers() -> Vec<String> {
    vec![
        "verify you are human".to_string(),
        "are you a robot".to_string(),
        "captcha".to_string(),
    ]
}

fn default_rate_limit_markers() -> Vec<String> {
    vec![
        "too many requests".to_string(),
        "unusual traffic".to_string(),
        "please slow down".to_string(),
    ]
}

fn default_passive_min() -> u64 {
    30_000
}

fn default_passive_max() -> u64 {
    60_000
}

fn default_solver_timeout() -> u64 {
    120
}

fn default_solver_poll() -> u64 {
    5_000
}

fn default_progress_interval() -> u64 {
    30_000
}

fn default_image_dir() -> String {
    "./images".to_string()
}
