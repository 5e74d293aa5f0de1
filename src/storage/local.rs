//! Local filesystem storage implementation.
//!
//! One file per key, for development and single-machine deployments.
//! Production serverless deployments should use `S3Storage`.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── config.toml                      # Site configuration
//! └── kv/
//!     ├── latest%3Adocs%3A1a2b3c4d5e6f7a8b
//!     └── backup%3Adocs%3A2026-01-02%3A1a2b...
//! ```
//!
//! Keys are percent-encoded into file names (`%`, `:`, `/`, `\`) and
//! every value is wrapped in a JSON envelope carrying its expiry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::{Envelope, KvStore, ListOptions, ListPage, PutOptions, paginate};

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    fn kv_dir(&self) -> PathBuf {
        self.root_dir.join("kv")
    }

    /// Get the full path for a key.
    fn path(&self, key: &str) -> PathBuf {
        self.kv_dir().join(encode_key(key))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// All stored keys, sorted.
    async fn all_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.kv_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(AppError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(".tmp") {
                continue;
            }
            if let Some(key) = decode_key(name) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl KvStore for LocalStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.read_bytes(key).await? {
            Some(bytes) => {
                let envelope: Envelope = serde_json::from_slice(&bytes)?;
                Ok(envelope.into_live())
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()> {
        let bytes = serde_json::to_vec(&Envelope::new(value, options))?;
        self.write_bytes(key, &bytes).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn list(&self, options: ListOptions) -> Result<ListPage> {
        let keys = self.all_keys().await?;
        // Expired entries are left on disk but hidden from listings.
        let mut live = Vec::with_capacity(keys.len());
        for key in keys.into_iter().filter(|k| k.starts_with(&options.prefix)) {
            if self.get(&key).await?.is_some() {
                live.push(key);
            }
        }
        Ok(paginate(live, &options))
    }
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push('%'),
            "3A" => out.push(':'),
            "2F" => out.push('/'),
            "5C" => out.push('\\'),
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage
            .put("latest:docs:abc", "hello", PutOptions::default())
            .await
            .unwrap();
        let data = storage.get("latest:docs:abc").await.unwrap();
        assert_eq!(data, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_values_live_directly_under_kv_dir() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage
            .put("full_scan:docs", "{}", PutOptions::default())
            .await
            .unwrap();
        assert!(tmp.path().join("kv").join(encode_key("full_scan:docs")).is_file());
        assert!(!tmp.path().join("kv").join("kv").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        assert!(storage.get("nope").await.unwrap().is_none());
        storage.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_value_reads_as_absent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage
            .put("batch_progress:docs", "{}", PutOptions::ttl(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(storage.get("batch_progress:docs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_prefix_and_delete() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        for key in [
            "backup:docs:2026-01-01:a",
            "backup:docs:2026-01-02:b",
            "backup:blog:2026-01-01:c",
            "meta:docs:2026-01-01:a",
        ] {
            storage.put(key, "x", PutOptions::default()).await.unwrap();
        }

        let page = storage.list(ListOptions::prefix("backup:docs:")).await.unwrap();
        assert_eq!(
            page.keys,
            vec!["backup:docs:2026-01-01:a", "backup:docs:2026-01-02:b"]
        );
        assert!(page.complete);

        storage.delete("backup:docs:2026-01-01:a").await.unwrap();
        let page = storage.list(ListOptions::prefix("backup:docs:")).await.unwrap();
        assert_eq!(page.keys, vec!["backup:docs:2026-01-02:b"]);
    }

    #[test]
    fn test_key_encoding_round_trips_separators() {
        let key = "diff:docs:2026-01-02:50%/x\\y";
        assert_eq!(decode_key(&encode_key(key)).as_deref(), Some(key));
        assert!(!encode_key(key).contains(':'));
    }
}
