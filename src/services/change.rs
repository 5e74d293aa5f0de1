//! Change detection between a fresh fetch and the stored `latest` record.

use crate::models::{BackupMetadata, ChangeThreshold};

/// Outcome of comparing two snapshots of a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeVerdict {
    /// No prior record
    New,
    Changed,
    Unchanged,
}

impl ChangeVerdict {
    pub fn is_changed(self) -> bool {
        !matches!(self, ChangeVerdict::Unchanged)
    }
}

/// Read-only comparison of normalized hashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector {
    min_change_size: usize,
}

impl ChangeDetector {
    pub fn new(threshold: &ChangeThreshold) -> Self {
        Self {
            min_change_size: threshold.min_change_size,
        }
    }

    /// Compare `current` against the previous `latest`, if any.
    ///
    /// Hashes are compared on normalized content, falling back to the raw
    /// hash for records written before normalization existed.
    pub fn detect(&self, current: &BackupMetadata, previous: Option<&BackupMetadata>) -> ChangeVerdict {
        let Some(previous) = previous else {
            return ChangeVerdict::New;
        };

        let same = match (&current.normalized_hash, &previous.normalized_hash) {
            (Some(a), Some(b)) => a == b,
            _ => current.content_hash == previous.content_hash,
        };
        if same {
            return ChangeVerdict::Unchanged;
        }

        if self.min_change_size > 0 {
            let before = previous.normalized_size.unwrap_or(previous.size);
            let after = current.normalized_size.unwrap_or(current.size);
            if before.abs_diff(after) < self.min_change_size {
                return ChangeVerdict::Unchanged;
            }
        }
        ChangeVerdict::Changed
    }
}
