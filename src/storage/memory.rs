//! In-process key-value store.
//!
//! Used by tests and one-shot local runs. Supports TTL and optional write
//! fault injection so callers can exercise store-failure paths.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::storage::{Envelope, KvStore, ListOptions, ListPage, PutOptions, paginate};

/// `BTreeMap`-backed store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Envelope>>,
    failing_prefix: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every `put` whose key starts with `prefix`.
    pub fn with_write_failures(prefix: impl Into<String>) -> Self {
        Self {
            entries: RwLock::default(),
            failing_prefix: Some(prefix.into()),
        }
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live keys under a prefix, for assertions.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned().and_then(Envelope::into_live))
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()> {
        if let Some(prefix) = &self.failing_prefix {
            if key.starts_with(prefix.as_str()) {
                return Err(AppError::store(format!("write rejected for {key}")));
            }
        }
        self.entries
            .write()
            .await
            .insert(key.to_string(), Envelope::new(value, options));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, options: ListOptions) -> Result<ListPage> {
        let now = Utc::now();
        let keys: Vec<String> = self
            .entries
            .read()
            .await
            .range(options.prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&options.prefix))
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(paginate(keys, &options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put("a", "1", PutOptions::default()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .put("short", "x", PutOptions::ttl(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.list(ListOptions::prefix("short")).await.unwrap().keys.is_empty());
    }

    #[tokio::test]
    async fn test_list_with_cursor() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .put(&format!("p:{i}"), "v", PutOptions::default())
                .await
                .unwrap();
        }
        store.put("q:0", "v", PutOptions::default()).await.unwrap();

        let first = store
            .list(ListOptions {
                prefix: "p:".into(),
                cursor: None,
                limit: Some(3),
            })
            .await
            .unwrap();
        assert_eq!(first.keys, vec!["p:0", "p:1", "p:2"]);
        assert!(!first.complete);

        let second = store
            .list(ListOptions {
                prefix: "p:".into(),
                cursor: first.cursor,
                limit: Some(3),
            })
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["p:3", "p:4"]);
        assert!(second.complete);
    }

    #[tokio::test]
    async fn test_write_failures() {
        let store = MemoryStore::with_write_failures("backup:");
        assert!(store.put("backup:x", "v", PutOptions::default()).await.is_err());
        assert!(store.put("latest:x", "v", PutOptions::default()).await.is_ok());
    }
}
