// src/config.rs

//! Configuration loading utilities.
//!
//! The CLI reads `config.toml` from disk through [`load_config`]; serverless
//! runs read it out of the key-value store through [`StoreConfigLoader`].

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::storage::KvStore;

/// Key the serverless config lives under by default.
pub const DEFAULT_CONFIG_KEY: &str = "config/config.toml";

/// Config loader for serverless environments.
pub struct StoreConfigLoader {
    store: Arc<dyn KvStore>,
    key: String,
}

impl StoreConfigLoader {
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Load, apply environment overrides and validate.
    pub async fn load_config(&self) -> Result<Config> {
        info!("Loading config from store: {}", self.key);
        let content = self
            .store
            .get(&self.key)
            .await?
            .ok_or_else(|| AppError::config(format!("config not found in store: {}", self.key)))?;

        let mut config = Config::from_toml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Load configuration from a TOML file.
///
/// A missing file falls back to defaults; a file that exists but does not
/// parse or validate is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path)?
    } else {
        warn!("Config file {:?} not found, using defaults", path);
        Config::default()
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, PutOptions};

    const SAMPLE: &str = r#"
[crawler]
call_budget = 400

[[sites]]
id = "docs"
sitemap_url = "https://example.com/sitemap.xml"
"#;

    #[tokio::test]
    async fn test_store_loader_reads_config() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(DEFAULT_CONFIG_KEY, SAMPLE, PutOptions::default())
            .await
            .unwrap();

        let config = StoreConfigLoader::new(store, DEFAULT_CONFIG_KEY)
            .load_config()
            .await
            .unwrap();
        assert_eq!(config.sites.len(), 1);
        assert!(config.site("docs").unwrap().is_sitemap_driven());
    }

    #[tokio::test]
    async fn test_store_loader_missing_key() {
        let store = Arc::new(MemoryStore::new());
        let err = StoreConfigLoader::new(store, "nope.toml")
            .load_config()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_load_config_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.sites.is_empty());
    }

    #[test]
    fn test_load_config_rejects_invalid_site() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[sites]]\nid = \"docs\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
