//! Markdown report generation
//!
//! Writes a human-readable report of one crawl session together with the
//! state of its collection's discovery cache.

use crate::crawler::CrawlSummary;
use crate::output::stats::CrawlStatistics;
use crate::output::summary::success_rate;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown report of a session
///
/// # Arguments
///
/// * `summary` - Summary returned by the coordinator
/// * `stats` - Statistics loaded after the run
/// * `output_path` - Path where the markdown file should be written
pub fn generate_markdown_report(
    summary: &CrawlSummary,
    stats: &CrawlStatistics,
    output_path: &Path,
) -> std::io::Result<()> {
    let markdown = format_markdown_report(summary, stats);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a session report as markdown
pub fn format_markdown_report(summary: &CrawlSummary, stats: &CrawlStatistics) -> String {
    let counters = &summary.counters;
    let cache = &stats.cache;
    let mut md = String::new();

    md.push_str(&format!("# Crawl Report: {}\n\n", summary.collection_key));

    md.push_str("## Session\n\n");
    md.push_str(&format!("- **Session ID**: {}\n", summary.session_id));
    md.push_str(&format!("- **Status**: {}\n", summary.status.to_db_string()));
    md.push_str(&format!(
        "- **Duration**: {:.0} seconds ({:.2} minutes)\n",
        summary.elapsed.as_secs_f64(),
        summary.elapsed.as_secs_f64() / 60.0
    ));
    if let Some(message) = &summary.error_message {
        md.push_str(&format!("- **Error**: {}\n", message));
    }
    md.push('\n');

    md.push_str("## Items\n\n");
    md.push_str("| Outcome | Count |\n");
    md.push_str("|---------|-------|\n");
    md.push_str(&format!("| Taken | {} |\n", counters.found));
    md.push_str(&format!("| New | {} |\n", counters.new));
    md.push_str(&format!("| Updated | {} |\n", counters.updated));
    md.push_str(&format!("| Failed | {} |\n", counters.failed));
    md.push_str(&format!("| Images downloaded | {} |\n", counters.images_ok));
    md.push_str(&format!("| Images failed | {} |\n\n", counters.images_failed));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n\n",
        success_rate(summary)
    ));

    md.push_str("## Discovery Cache\n\n");
    md.push_str(&format!("- **Listing pages walked this run**: {}\n", summary.pages_walked));
    md.push_str(&format!("- **Listing pages failed this run**: {}\n", counters.pages_failed));
    md.push_str(&format!("- **Last listing page cached**: {}\n", cache.last_page_seen));
    md.push_str(&format!("- **URLs cached**: {}\n", cache.total));
    md.push_str(&format!("- **Processed**: {}\n", cache.processed));
    md.push_str(&format!("- **Pending**: {}\n", cache.pending()));
    md.push_str(&format!("- **Records stored**: {}\n\n", stats.records));

    if !stats.last_session_errors.is_empty() {
        md.push_str("## Errors\n\n");
        md.push_str("| Kind | Count |\n");
        md.push_str("|------|-------|\n");
        for (kind, count) in &stats.last_session_errors {
            md.push_str(&format!("| {} | {} |\n", kind, count));
        }
        md.push('\n');
    }

    md
}
