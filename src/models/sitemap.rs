//! Persistent per-site sitemap and scan state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Validators and fingerprint of the last-seen sitemap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitemapState {
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    /// Hash of the sorted `<loc>` set of the whole resolution tree
    pub content_hash: String,
    pub url_count: usize,
    pub checked_at: DateTime<Utc>,
}

/// Marks that today's full pass over a site is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullScanState {
    /// `YYYY-MM-DD` (UTC)
    pub date: String,
    pub completed_at: DateTime<Utc>,
    pub total_urls: usize,
}

/// Present once a site has switched to listener mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerState {
    pub enabled_at: DateTime<Utc>,
    pub threshold: usize,
    pub initial_url_count: usize,
}

/// URL set seen by the last listener-mode run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSnapshot {
    pub urls: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Describes the chunked URL set cached for a running cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlSetManifest {
    pub chunks: usize,
    pub total_urls: usize,
    pub created_at: DateTime<Utc>,
}
