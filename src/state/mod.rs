//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `SessionStatus`: lifecycle of one orchestrator run
//! - `UrlOutcome`: result recorded on each discovered URL
//! - `FetchStatus` / `FetchOutcome`: terminal result of an item's attempt sequence
//! - `ErrorKind`: taxonomy of the crawl error audit trail

mod outcome;
mod session_status;

// Re-export main types
pub use outcome::{is_transient_http, ErrorKind, FetchOutcome, FetchStatus, UrlOutcome};
pub use session_status::SessionStatus;
