//! Storage abstractions for snapshot persistence.
//!
//! The engine talks to an abstract key-value store ([`KvStore`]) with
//! optional per-key TTL and prefix listing. [`SiteStore`] layers the key
//! schema and JSON encoding on top of it.
//!
//! ## Key Schema
//!
//! ```text
//! backup:{site}:{date}:{urlHash}     # raw page content for a day
//! meta:{site}:{date}:{urlHash}       # BackupMetadata for a day
//! latest:{site}:{urlHash}            # newest BackupMetadata
//! prev_latest:{site}:{urlHash}       # value `latest` held before the last store
//! batch_progress:{site}              # BatchProgress (TTL 1 day)
//! sitemap_state:{site}               # SitemapState
//! full_scan:{site}                   # FullScanState
//! sitemap_listener:{site}            # ListenerState
//! sitemap_snapshot:{site}            # ListenerSnapshot
//! url_set_meta:{site}                # UrlSetManifest (TTL 1 day)
//! url_set:{site}:{chunk}             # cached URL set chunk (TTL 1 day)
//! diff:{site}:{date}:{urlHash}       # DiffCacheEntry (TTL 1 hour)
//! ```

pub mod keys;
pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;
mod site;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStore;
#[cfg(feature = "s3")]
pub use s3::S3Storage;
pub use site::{SiteStore, SnapshotPair};

/// Options for a `put`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Expire the key after this long
    pub ttl: Option<Duration>,
}

impl PutOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// Options for a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: String,
    /// Opaque continuation token from a previous page
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub cursor: Option<String>,
    /// No further pages
    pub complete: bool,
}

/// Default page size for listings.
pub const DEFAULT_LIST_LIMIT: usize = 1000;

/// Key-value store required from the environment.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value; expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, optionally with a TTL.
    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys under a prefix in lexicographic order.
    async fn list(&self, options: ListOptions) -> Result<ListPage>;
}

/// Stored form used by backends without native TTL support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new(value: &str, options: PutOptions) -> Self {
        Self {
            value: value.to_string(),
            expires_at: options.ttl.and_then(|ttl| {
                chrono::Duration::from_std(ttl)
                    .ok()
                    .map(|ttl| Utc::now() + ttl)
            }),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Value if still live.
    pub fn into_live(self) -> Option<String> {
        if self.is_expired(Utc::now()) {
            None
        } else {
            Some(self.value)
        }
    }
}

/// Slice a sorted key list into a listing page.
///
/// The cursor is the last key of the previous page.
pub(crate) fn paginate(sorted_keys: Vec<String>, options: &ListOptions) -> ListPage {
    let limit = options.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);
    let mut keys: Vec<String> = sorted_keys
        .into_iter()
        .filter(|k| k.starts_with(&options.prefix))
        .filter(|k| options.cursor.as_ref().is_none_or(|c| k.as_str() > c.as_str()))
        .take(limit + 1)
        .collect();

    let complete = keys.len() <= limit;
    keys.truncate(limit);
    let cursor = if complete { None } else { keys.last().cloned() };

    ListPage {
        keys,
        cursor,
        complete,
    }
}

/// Collect every key under a prefix, following cursors.
pub async fn list_all(store: &dyn KvStore, prefix: &str) -> Result<Vec<String>> {
    let mut all = Vec::new();
    let mut cursor = None;
    loop {
        let page = store
            .list(ListOptions {
                prefix: prefix.to_string(),
                cursor,
                limit: None,
            })
            .await?;
        all.extend(page.keys);
        if page.complete || page.cursor.is_none() {
            break;
        }
        cursor = page.cursor;
    }
    Ok(all)
}
