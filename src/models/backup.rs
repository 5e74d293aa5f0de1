//! Stored snapshot metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detected payload type of a fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Html,
    Json,
    Text,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Html => "html",
            ContentType::Json => "json",
            ContentType::Text => "text",
        }
    }
}

/// Metadata recorded for one stored copy of a URL.
///
/// One instance exists per (site, date, url); the `latest` instance per
/// (site, url) is overwritten on every store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the raw body
    pub content_hash: String,
    /// SHA-256 of the normalized body; absent in records written before normalization existed
    #[serde(default)]
    pub normalized_hash: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub etag: Option<String>,
    pub size: usize,
    #[serde(default)]
    pub normalized_size: Option<usize>,
    pub fetch_duration_ms: u64,
    #[serde(default)]
    pub redirect_count: u32,
    #[serde(default)]
    pub final_url: Option<String>,
}

impl BackupMetadata {
    /// `YYYY-MM-DD` (UTC) of the snapshot.
    pub fn date(&self) -> String {
        crate::storage::keys::date_key(self.timestamp)
    }

    /// Hash used for change comparison.
    pub fn comparison_hash(&self) -> &str {
        self.normalized_hash.as_deref().unwrap_or(&self.content_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_record_without_normalized_hash() {
        let json = r#"{
            "url": "https://example.com/",
            "timestamp": "2026-01-02T03:04:05Z",
            "contentHash": "abc",
            "status": 200,
            "size": 10,
            "fetchDurationMs": 12
        }"#;
        let meta: BackupMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.normalized_hash, None);
        assert_eq!(meta.comparison_hash(), "abc");
        assert_eq!(meta.content_type, ContentType::Html);
        assert_eq!(meta.date(), "2026-01-02");
    }
}
