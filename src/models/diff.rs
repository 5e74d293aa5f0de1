//! Structured diff between two stored snapshots of a page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an element changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// A single detected change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Element or signal name (`title`, `h1`, `nav`, `inline-style`, ...)
    pub element: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Higher sorts first when truncating
    pub priority: u8,
}

/// Change counts per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub total_changes: usize,
    pub content_changes: usize,
    pub style_changes: usize,
    pub structure_changes: usize,
    /// Highest priority among all changes (0 when none)
    pub max_priority: u8,
}

/// Generation details of a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffMetadata {
    pub generated_at: DateTime<Utc>,
    /// Only a prefix of each document was compared
    pub partial: bool,
    /// `limit_changes` dropped entries
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub from_cache: bool,
    pub processing_ms: u64,
    pub previous_size: usize,
    pub current_size: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Content / style / structure breakdown of a page change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedDiff {
    pub url: String,
    pub date: String,
    pub previous_hash: String,
    pub current_hash: String,
    pub content: Vec<Change>,
    pub style: Vec<Change>,
    pub structure: Vec<Change>,
    pub summary: DiffSummary,
    pub metadata: DiffMetadata,
}

impl DetailedDiff {
    /// Recompute the summary from the change lists.
    pub fn refresh_summary(&mut self) {
        let max_priority = self
            .content
            .iter()
            .chain(&self.style)
            .chain(&self.structure)
            .map(|c| c.priority)
            .max()
            .unwrap_or(0);
        self.summary = DiffSummary {
            total_changes: self.content.len() + self.style.len() + self.structure.len(),
            content_changes: self.content.len(),
            style_changes: self.style.len(),
            structure_changes: self.structure.len(),
            max_priority,
        };
    }

    pub fn has_changes(&self) -> bool {
        self.summary.total_changes > 0
    }
}

/// Share of `max_changes` given to each category when truncating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncationSplit {
    pub content: f64,
    pub style: f64,
    pub structure: f64,
}

impl Default for TruncationSplit {
    fn default() -> Self {
        Self {
            content: 0.6,
            style: 0.2,
            structure: 0.2,
        }
    }
}

/// What `generate_diff` computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffOptions {
    #[serde(default = "enabled")]
    pub include_content: bool,
    #[serde(default = "enabled")]
    pub include_style: bool,
    #[serde(default = "enabled")]
    pub include_structure: bool,
    #[serde(default)]
    pub max_changes: Option<usize>,
    #[serde(default = "enabled")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub split: TruncationSplit,
}

fn enabled() -> bool {
    true
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            include_content: true,
            include_style: true,
            include_structure: true,
            max_changes: None,
            cache_enabled: true,
            split: TruncationSplit::default(),
        }
    }
}

/// Cached diff with expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffCacheEntry {
    pub diff: DetailedDiff,
    pub options: DiffOptions,
    pub expires_at: DateTime<Utc>,
}
