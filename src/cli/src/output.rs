//! Report printing.

use imagesync_runtime::{SyncReport, SyncStatus};

/// Human readable report lines.
pub fn render_report(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![report.summary()];
    for failure in &report.failed {
        lines.push(format!("  failed  {}: {}", failure.tag, failure.error));
    }
    if !report.skipped.is_empty() {
        lines.push(format!("  skipped {} tag(s)", report.skipped.len()));
    }
    lines
}

/// Print a report to stdout, as JSON or as text.
pub fn print_report(report: &SyncReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for line in render_report(report) {
        println!("{line}");
    }
    if report.status == SyncStatus::PartiallySynced {
        tracing::warn!(
            failed = report.failed.len(),
            copied = report.copied.len(),
            "Some tags failed to sync"
        );
    }
    Ok(())
}
