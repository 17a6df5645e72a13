//! Output module for crawl summaries and reports
//!
//! This module handles:
//! - The console summary printed after every run
//! - Discovery cache and session statistics (`--stats`)
//! - Markdown reports of a session (`--report`)

mod markdown;
pub mod stats;
mod summary;

pub use markdown::{format_markdown_report, generate_markdown_report};
pub use stats::{load_statistics, print_statistics, render_statistics, CrawlStatistics};
pub use summary::{print_summary, render_summary, success_rate};
