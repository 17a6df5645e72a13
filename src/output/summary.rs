//! Console summary printed at the end of every run

use crate::crawler::CrawlSummary;
use std::fmt::Write;

/// Share of finished items that produced a record, in percent
pub fn success_rate(summary: &CrawlSummary) -> f64 {
    let completed = summary.counters.completed();
    if completed == 0 {
        return 0.0;
    }
    (summary.counters.new + summary.counters.updated) as f64 / completed as f64 * 100.0
}

/// Formats a run summary
pub fn render_summary(summary: &CrawlSummary) -> String {
    let counters = &summary.counters;
    let mut out = String::new();

    let _ = writeln!(out, "=== Crawl Session {} ===", summary.session_id);
    let _ = writeln!(out, "Collection: {}", summary.collection_key);
    let _ = writeln!(out, "Status: {}", summary.status.to_db_string());
    let _ = writeln!(out, "Duration: {:.1}s", summary.elapsed.as_secs_f64());
    if let Some(message) = &summary.error_message {
        let _ = writeln!(out, "Error: {}", message);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Listing pages walked: {}", summary.pages_walked);
    if counters.pages_failed > 0 {
        let _ = writeln!(out, "Listing pages failed: {}", counters.pages_failed);
    }
    let _ = writeln!(out, "Items taken: {}", counters.found);
    let _ = writeln!(out, "  New: {}", counters.new);
    let _ = writeln!(out, "  Updated: {}", counters.updated);
    let _ = writeln!(out, "  Failed: {}", counters.failed);
    let unfinished = counters.found.saturating_sub(counters.completed());
    if unfinished > 0 {
        let _ = writeln!(out, "  Not started: {}", unfinished);
    }
    if counters.images_ok + counters.images_failed > 0 {
        let _ = writeln!(
            out,
            "Images: {} downloaded, {} failed",
            counters.images_ok, counters.images_failed
        );
    }
    let _ = writeln!(out, "Success Rate: {:.1}%", success_rate(summary));

    out
}

pub fn print_summary(summary: &CrawlSummary) {
    print!("{}", render_summary(summary));
}
