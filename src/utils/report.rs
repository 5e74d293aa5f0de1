// src/utils/report.rs

//! Console report formatting for the CLI.
//!
//! Engine code logs through the `log` facade; these helpers print the
//! human-facing run summaries with the same timestamped layout.

use chrono::Local;

use crate::models::{BatchedResult, DetailedDiff, UrlOutcome};

fn line(message: &str) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    println!("[{}] [INFO] {}", timestamp, message);
}

/// Print a boxed header.
pub fn header(title: &str) {
    let border = "═".repeat(60);
    line(&border);
    line(&format!("  {}", title));
    line(&border);
}

/// Print a separator line.
pub fn separator() {
    line(&"─".repeat(60));
}

/// Print an indented sub-item.
pub fn sub_item(message: &str) {
    line(&format!("    {}", message));
}

/// Print a titled key/value summary block.
pub fn summary(title: &str, items: &[(&str, String)]) {
    println!();
    line(&format!("[SUMMARY] {}", title));
    for (key, value) in items {
        line(&format!("    {}: {}", key, value));
    }
}

/// Summary block for one batch invocation.
pub fn batch(result: &BatchedResult) {
    let mut items = vec![
        ("State", format!("{:?}", result.state)),
        ("Total URLs", result.total_urls.to_string()),
        (
            "Processed",
            format!(
                "{} (offset {}, batch size {})",
                result.processed_in_batch, result.batch_offset, result.batch_size
            ),
        ),
        ("Successful", result.successful_backups.to_string()),
        (
            "Failed",
            format!(
                "{} ({} store)",
                result.failed_backups, result.store_failures
            ),
        ),
        ("Changed", result.changed_urls.len().to_string()),
        (
            "Progress",
            format!(
                "{}/{} ({:.1}%)",
                result.progress.completed, result.progress.total, result.progress.percent_complete
            ),
        ),
        ("Elapsed", format!("{}ms", result.execution_time)),
    ];
    if let Some(reason) = &result.skip_reason {
        items.push(("Skipped", format!("{:?}", reason)));
    }
    if result.listener_mode {
        items.push(("Mode", "listener".to_string()));
    }
    summary(&format!("Site {}", result.site_id), &items);

    for url in &result.changed_urls {
        sub_item(&format!("changed: {}", url));
    }
    for outcome in &result.results {
        if let UrlOutcome::Failure { url, stage, error } = outcome {
            sub_item(&format!("failed ({:?}): {} {}", stage, url, error));
        }
    }
    for warning in &result.warnings {
        sub_item(&format!("warning: {}", warning));
    }
}

/// Summary block for a diff.
pub fn diff(diff: &DetailedDiff) {
    summary(
        &format!("Diff {} ({})", diff.url, diff.date),
        &[
            ("Previous", diff.previous_hash.clone()),
            ("Current", diff.current_hash.clone()),
            ("Content", diff.summary.content_changes.to_string()),
            ("Style", diff.summary.style_changes.to_string()),
            ("Structure", diff.summary.structure_changes.to_string()),
            ("Partial", diff.metadata.partial.to_string()),
            ("Truncated", diff.metadata.truncated.to_string()),
        ],
    );
    if !diff.has_changes() {
        sub_item("no content, style or structure changes detected");
        return;
    }
    for change in diff.content.iter().chain(&diff.structure).chain(&diff.style) {
        sub_item(&format!(
            "[p{}] {:?} {}: {} -> {}",
            change.priority,
            change.kind,
            change.element,
            change.before.as_deref().unwrap_or("-"),
            change.after.as_deref().unwrap_or("-"),
        ));
    }
}
