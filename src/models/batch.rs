//! Batch crawl inputs, checkpoints and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BackupMetadata;

/// Caller-supplied batch parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_offset: Option<usize>,
    #[serde(default)]
    pub continue_from_last: bool,
}

impl BatchOptions {
    /// Resume from the stored checkpoint.
    pub fn resume() -> Self {
        Self {
            continue_from_last: true,
            ..Self::default()
        }
    }
}

/// Checkpoint kept while a site's batch cycle is incomplete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub next_offset: usize,
    pub total_urls: usize,
    pub last_run: DateTime<Utc>,
}

/// Position of a site in the batch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrawlState {
    /// No progress record
    Idle,
    /// First batch of a cycle
    Scanning,
    /// Resumed from a stored offset
    InProgress,
    /// Progress cleared, full scan recorded
    CycleComplete,
}

/// Why an invocation did no page work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    AlreadyScannedToday,
    SitemapUnchanged,
    ListenerSnapshotCreated,
    ResolutionFailed,
}

/// Where a per-URL failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Fetch,
    Store,
}

/// Outcome of one URL in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UrlOutcome {
    Success {
        url: String,
        metadata: BackupMetadata,
        changed: bool,
    },
    Failure {
        url: String,
        stage: FailureStage,
        error: String,
    },
}

/// Completion block of a batch result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgressReport {
    pub completed: usize,
    pub total: usize,
    pub percent_complete: f64,
}

impl BatchProgressReport {
    pub fn new(completed: usize, total: usize) -> Self {
        let percent_complete = if total == 0 {
            100.0
        } else {
            ((completed as f64 / total as f64) * 1000.0).round() / 10.0
        };
        Self {
            completed,
            total,
            percent_complete,
        }
    }
}

/// Result of one batch invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchedResult {
    pub site_id: String,
    pub total_urls: usize,
    pub processed_in_batch: usize,
    pub successful_backups: usize,
    /// Fetch failures plus store failures
    pub failed_backups: usize,
    /// URLs fetched but not persisted
    pub store_failures: usize,
    pub changed_urls: Vec<String>,
    /// Milliseconds spent in this invocation
    pub execution_time: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub results: Vec<UrlOutcome>,
    pub batch_offset: usize,
    pub batch_size: usize,
    pub has_more: bool,
    pub next_offset: usize,
    pub progress: BatchProgressReport,
    pub state: CrawlState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default)]
    pub listener_mode: bool,
}

impl BatchedResult {
    /// Empty result positioned at `offset`.
    pub fn empty(site_id: &str, offset: usize, batch_size: usize) -> Self {
        Self {
            site_id: site_id.to_string(),
            total_urls: 0,
            processed_in_batch: 0,
            successful_backups: 0,
            failed_backups: 0,
            store_failures: 0,
            changed_urls: Vec::new(),
            execution_time: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            results: Vec::new(),
            batch_offset: offset,
            batch_size,
            has_more: false,
            next_offset: offset,
            progress: BatchProgressReport::new(0, 0),
            state: CrawlState::Idle,
            skip_reason: None,
            listener_mode: false,
        }
    }

    /// Record one URL outcome and update counters.
    pub fn record(&mut self, outcome: UrlOutcome) {
        match &outcome {
            UrlOutcome::Success { url, changed, .. } => {
                self.successful_backups += 1;
                if *changed {
                    self.changed_urls.push(url.clone());
                }
            }
            UrlOutcome::Failure { url, stage, error } => {
                self.failed_backups += 1;
                if *stage == FailureStage::Store {
                    self.store_failures += 1;
                }
                self.errors.push(format!("{url}: {error}"));
            }
        }
        self.results.push(outcome);
    }
}
