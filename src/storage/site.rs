//! Typed per-site access to the key-value store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;
use crate::models::{
    BackupMetadata, BatchProgress, FullScanState, ListenerSnapshot, ListenerState, SitemapState,
    UrlSetManifest,
};
use crate::storage::{KvStore, PutOptions, keys};

/// Checkpoints and cached URL sets expire after a day.
const CYCLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// URLs per cached URL-set chunk.
const URL_SET_CHUNK: usize = 1000;

/// Two consecutive stored versions of a URL.
#[derive(Debug, Clone)]
pub struct SnapshotPair {
    pub previous: BackupMetadata,
    pub previous_content: String,
    pub current: BackupMetadata,
    pub current_content: String,
}

/// Key schema and JSON encoding over a [`KvStore`].
#[derive(Clone)]
pub struct SiteStore {
    kv: Arc<dyn KvStore>,
}

impl SiteStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: PutOptions,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.put(key, &raw, options).await
    }

    // --- Snapshots ---

    /// Newest stored metadata for a URL.
    pub async fn latest(&self, site: &str, url: &str) -> Result<Option<BackupMetadata>> {
        self.get_json(&keys::latest(site, &keys::url_hash(url)))
            .await
    }

    /// Metadata `latest` held before the last store.
    pub async fn previous_latest(&self, site: &str, url: &str) -> Result<Option<BackupMetadata>> {
        self.get_json(&keys::prev_latest(site, &keys::url_hash(url)))
            .await
    }

    /// Persist content and metadata for a fetched URL.
    ///
    /// Writes the dated copy first, then rotates `latest` into `prev_latest`
    /// so a failure never leaves `latest` pointing at content that was not stored.
    pub async fn store_snapshot(
        &self,
        site: &str,
        content: &str,
        metadata: &BackupMetadata,
        previous: Option<&BackupMetadata>,
    ) -> Result<()> {
        let hash = keys::url_hash(&metadata.url);
        let date = metadata.date();

        self.kv
            .put(&keys::backup(site, &date, &hash), content, PutOptions::default())
            .await?;
        self.put_json(&keys::meta(site, &date, &hash), metadata, PutOptions::default())
            .await?;
        if let Some(previous) = previous {
            self.put_json(&keys::prev_latest(site, &hash), previous, PutOptions::default())
                .await?;
        }
        self.put_json(&keys::latest(site, &hash), metadata, PutOptions::default())
            .await
    }

    /// Stored content of a URL for a day.
    pub async fn content(&self, site: &str, date: &str, url: &str) -> Result<Option<String>> {
        self.kv
            .get(&keys::backup(site, date, &keys::url_hash(url)))
            .await
    }

    /// `prev_latest` and `latest` with their contents, if both are still stored.
    pub async fn snapshot_pair(&self, site: &str, url: &str) -> Result<Option<SnapshotPair>> {
        let (Some(current), Some(previous)) = (
            self.latest(site, url).await?,
            self.previous_latest(site, url).await?,
        ) else {
            return Ok(None);
        };

        let current_content = self.content(site, &current.date(), url).await?;
        let previous_content = self.content(site, &previous.date(), url).await?;
        match (previous_content, current_content) {
            (Some(previous_content), Some(current_content)) => Ok(Some(SnapshotPair {
                previous,
                previous_content,
                current,
                current_content,
            })),
            _ => Ok(None),
        }
    }

    // --- Batch progress ---

    pub async fn progress(&self, site: &str) -> Result<Option<BatchProgress>> {
        self.get_json(&keys::batch_progress(site)).await
    }

    pub async fn save_progress(&self, site: &str, progress: &BatchProgress) -> Result<()> {
        self.put_json(&keys::batch_progress(site), progress, PutOptions::ttl(CYCLE_TTL))
            .await
    }

    pub async fn clear_progress(&self, site: &str) -> Result<()> {
        self.kv.delete(&keys::batch_progress(site)).await
    }

    // --- Full scan ---

    pub async fn full_scan(&self, site: &str) -> Result<Option<FullScanState>> {
        self.get_json(&keys::full_scan(site)).await
    }

    pub async fn mark_full_scan(&self, site: &str, total_urls: usize) -> Result<()> {
        let now = Utc::now();
        let state = FullScanState {
            date: keys::date_key(now),
            completed_at: now,
            total_urls,
        };
        self.put_json(&keys::full_scan(site), &state, PutOptions::default())
            .await
    }

    pub async fn clear_full_scan(&self, site: &str) -> Result<()> {
        self.kv.delete(&keys::full_scan(site)).await
    }

    // --- Sitemap ---

    pub async fn sitemap_state(&self, site: &str) -> Result<Option<SitemapState>> {
        self.get_json(&keys::sitemap_state(site)).await
    }

    pub async fn save_sitemap_state(&self, site: &str, state: &SitemapState) -> Result<()> {
        self.put_json(&keys::sitemap_state(site), state, PutOptions::default())
            .await
    }

    /// Forget the sitemap fingerprint so the next run re-resolves in full.
    pub async fn clear_sitemap_state(&self, site: &str) -> Result<()> {
        self.kv.delete(&keys::sitemap_state(site)).await
    }

    pub async fn listener(&self, site: &str) -> Result<Option<ListenerState>> {
        self.get_json(&keys::sitemap_listener(site)).await
    }

    pub async fn save_listener(&self, site: &str, state: &ListenerState) -> Result<()> {
        self.put_json(&keys::sitemap_listener(site), state, PutOptions::default())
            .await
    }

    pub async fn listener_snapshot(&self, site: &str) -> Result<Option<ListenerSnapshot>> {
        self.get_json(&keys::sitemap_snapshot(site)).await
    }

    pub async fn save_listener_snapshot(
        &self,
        site: &str,
        snapshot: &ListenerSnapshot,
    ) -> Result<()> {
        self.put_json(&keys::sitemap_snapshot(site), snapshot, PutOptions::default())
            .await
    }

    // --- URL set cache ---

    /// Cache the processing set of a cycle in fixed-size chunks.
    pub async fn save_url_set(&self, site: &str, urls: &[String]) -> Result<()> {
        let chunks: Vec<&[String]> = urls.chunks(URL_SET_CHUNK).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            self.put_json(&keys::url_set_chunk(site, i), chunk, PutOptions::ttl(CYCLE_TTL))
                .await?;
        }
        let manifest = UrlSetManifest {
            chunks: chunks.len(),
            total_urls: urls.len(),
            created_at: Utc::now(),
        };
        self.put_json(&keys::url_set_meta(site), &manifest, PutOptions::ttl(CYCLE_TTL))
            .await
    }

    /// Cached processing set, `None` if missing or incomplete.
    pub async fn url_set(&self, site: &str) -> Result<Option<Vec<String>>> {
        let Some(manifest) = self
            .get_json::<UrlSetManifest>(&keys::url_set_meta(site))
            .await?
        else {
            return Ok(None);
        };

        let mut urls = Vec::with_capacity(manifest.total_urls);
        for i in 0..manifest.chunks {
            match self
                .get_json::<Vec<String>>(&keys::url_set_chunk(site, i))
                .await?
            {
                Some(chunk) => urls.extend(chunk),
                None => return Ok(None),
            }
        }
        if urls.len() != manifest.total_urls {
            return Ok(None);
        }
        Ok(Some(urls))
    }

    pub async fn clear_url_set(&self, site: &str) -> Result<()> {
        if let Some(manifest) = self
            .get_json::<UrlSetManifest>(&keys::url_set_meta(site))
            .await?
        {
            for i in 0..manifest.chunks {
                self.kv.delete(&keys::url_set_chunk(site, i)).await?;
            }
        }
        self.kv.delete(&keys::url_set_meta(site)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use crate::storage::MemoryStore;

    fn store() -> SiteStore {
        SiteStore::new(Arc::new(MemoryStore::new()))
    }

    fn meta(url: &str, hash: &str, day: u32) -> BackupMetadata {
        BackupMetadata {
            url: url.to_string(),
            timestamp: chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 1, day, 8, 0, 0).unwrap(),
            content_hash: hash.to_string(),
            normalized_hash: Some(hash.to_string()),
            status: 200,
            content_type: ContentType::Html,
            etag: None,
            size: 4,
            normalized_size: Some(4),
            fetch_duration_ms: 5,
            redirect_count: 0,
            final_url: None,
        }
    }

    #[tokio::test]
    async fn test_store_snapshot_rotates_latest() {
        let store = store();
        let url = "https://example.com/a";

        let first = meta(url, "h1", 1);
        store.store_snapshot("docs", "one", &first, None).await.unwrap();
        assert_eq!(store.latest("docs", url).await.unwrap(), Some(first.clone()));
        assert!(store.previous_latest("docs", url).await.unwrap().is_none());

        let second = meta(url, "h2", 2);
        store
            .store_snapshot("docs", "two", &second, Some(&first))
            .await
            .unwrap();

        let pair = store.snapshot_pair("docs", url).await.unwrap().unwrap();
        assert_eq!(pair.previous.content_hash, "h1");
        assert_eq!(pair.previous_content, "one");
        assert_eq!(pair.current.content_hash, "h2");
        assert_eq!(pair.current_content, "two");
    }

    #[tokio::test]
    async fn test_url_set_round_trip_across_chunks() {
        let store = store();
        let urls: Vec<String> = (0..2500)
            .map(|i| format!("https://example.com/{i}"))
            .collect();
        store.save_url_set("docs", &urls).await.unwrap();
        assert_eq!(store.url_set("docs").await.unwrap(), Some(urls));

        store.clear_url_set("docs").await.unwrap();
        assert!(store.url_set("docs").await.unwrap().is_none());
        assert!(store.kv().get("url_set:docs:2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_progress_and_full_scan() {
        let store = store();
        let progress = BatchProgress {
            next_offset: 10,
            total_urls: 30,
            last_run: Utc::now(),
        };
        store.save_progress("docs", &progress).await.unwrap();
        assert_eq!(store.progress("docs").await.unwrap(), Some(progress));
        store.clear_progress("docs").await.unwrap();
        assert!(store.progress("docs").await.unwrap().is_none());

        store.mark_full_scan("docs", 30).await.unwrap();
        let scan = store.full_scan("docs").await.unwrap().unwrap();
        assert_eq!(scan.date, keys::today());
        assert_eq!(scan.total_urls, 30);
    }
}
