//! Application and per-site configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::url::is_http_url;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Engine-wide crawling behavior
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Monitored sites
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Look up a site by id.
    pub fn site(&self, id: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.id == id)
    }

    /// Override engine settings from environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Some(budget) = env_parse::<usize>("SITEWATCH_CALL_BUDGET") {
            self.crawler.call_budget = budget;
        }
        if let Some(size) = env_parse::<usize>("SITEWATCH_BATCH_SIZE") {
            self.crawler.default_batch_size = size;
        }
        if let Ok(agent) = std::env::var("SITEWATCH_USER_AGENT") {
            if !agent.trim().is_empty() {
                self.crawler.user_agent = agent;
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        self.crawler.validate()?;

        let mut seen = HashSet::new();
        for site in &self.sites {
            site.validate()?;
            if !seen.insert(site.id.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate site id '{}'",
                    site.id
                )));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Engine-wide crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Outbound calls (fetches + store operations) allowed per invocation
    #[serde(default = "defaults::call_budget")]
    pub call_budget: usize,

    /// Batch size used when the caller does not ask for one
    #[serde(default = "defaults::default_batch_size")]
    pub default_batch_size: usize,

    /// Redirect hops followed per fetch
    #[serde(default = "defaults::max_redirects")]
    pub max_redirects: usize,

    /// Maximum sitemap-index nesting depth
    #[serde(default = "defaults::sitemap_max_depth")]
    pub sitemap_max_depth: usize,

    /// URL count above which a site switches to listener mode
    #[serde(default = "defaults::listener_threshold")]
    pub listener_threshold: usize,

    /// Timeout for sitemap requests in milliseconds
    #[serde(default = "defaults::sitemap_timeout_ms")]
    pub sitemap_timeout_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            call_budget: defaults::call_budget(),
            default_batch_size: defaults::default_batch_size(),
            max_redirects: defaults::max_redirects(),
            sitemap_max_depth: defaults::sitemap_max_depth(),
            listener_threshold: defaults::listener_threshold(),
            sitemap_timeout_ms: defaults::sitemap_timeout_ms(),
        }
    }
}

impl CrawlerConfig {
    fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.call_budget == 0 {
            return Err(AppError::validation("crawler.call_budget must be > 0"));
        }
        if self.default_batch_size == 0 {
            return Err(AppError::validation(
                "crawler.default_batch_size must be > 0",
            ));
        }
        if self.sitemap_timeout_ms == 0 {
            return Err(AppError::validation(
                "crawler.sitemap_timeout_ms must be > 0",
            ));
        }
        Ok(())
    }
}

/// A monitored site. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Stable identifier used in storage keys
    pub id: String,

    /// Sitemap (or sitemap index) to resolve the URL set from
    #[serde(default)]
    pub sitemap_url: Option<String>,

    /// Explicit URL list, used when no sitemap is configured
    #[serde(default)]
    pub urls: Vec<String>,

    /// Days of dated backups to keep
    #[serde(default = "defaults::retention_days")]
    pub retention_days: u32,

    /// HTTP behavior for page fetches
    #[serde(default)]
    pub fetch: FetchOptions,

    /// Change sensitivity settings
    #[serde(default)]
    pub change_threshold: ChangeThreshold,

    /// Regexes; matching URLs are never fetched
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl SiteConfig {
    /// Site driven by a sitemap.
    pub fn with_sitemap(id: impl Into<String>, sitemap_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sitemap_url: Some(sitemap_url.into()),
            urls: Vec::new(),
            retention_days: defaults::retention_days(),
            fetch: FetchOptions::default(),
            change_threshold: ChangeThreshold::default(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Site driven by an explicit URL list.
    pub fn with_urls(id: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            sitemap_url: None,
            urls,
            ..Self::with_sitemap(id, String::new())
        }
    }

    /// Whether the URL set comes from a sitemap.
    pub fn is_sitemap_driven(&self) -> bool {
        self.sitemap_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty()
            || !self
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::validation(format!(
                "site id '{}' must be non-empty and use only [A-Za-z0-9_-]",
                self.id
            )));
        }
        if !self.is_sitemap_driven() && self.urls.is_empty() {
            return Err(AppError::validation(format!(
                "site '{}' needs a sitemap_url or a urls list",
                self.id
            )));
        }
        if let Some(sitemap_url) = self.sitemap_url.as_deref().map(str::trim) {
            if !sitemap_url.is_empty() && !is_http_url(sitemap_url) {
                return Err(AppError::validation(format!(
                    "site '{}': sitemap_url '{}' is not an http(s) URL",
                    self.id, sitemap_url
                )));
            }
        }
        if let Some(bad) = self
            .urls
            .iter()
            .map(|u| u.trim())
            .find(|u| !u.is_empty() && !is_http_url(u))
        {
            return Err(AppError::validation(format!(
                "site '{}': '{}' is not an http(s) URL",
                self.id, bad
            )));
        }
        if self.fetch.concurrency == 0 {
            return Err(AppError::validation(format!(
                "site '{}': fetch.concurrency must be > 0",
                self.id
            )));
        }
        if self.fetch.timeout_ms == 0 {
            return Err(AppError::validation(format!(
                "site '{}': fetch.timeout_ms must be > 0",
                self.id
            )));
        }
        Ok(())
    }
}

/// HTTP fetch behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Per-request timeout in milliseconds
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "defaults::retries")]
    pub retries: u32,

    /// Base backoff delay; doubled on every retry
    #[serde(default = "defaults::retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Parallel fetches (capped by the engine)
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::timeout_ms(),
            retries: defaults::retries(),
            retry_delay_ms: defaults::retry_delay_ms(),
            concurrency: defaults::concurrency(),
        }
    }
}

/// Change sensitivity settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChangeThreshold {
    /// Normalized byte-size delta below which a hash change is ignored (0 = any change)
    #[serde(default)]
    pub min_change_size: usize,

    /// Site-specific regexes stripped before hashing
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

mod defaults {
    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; sitewatch/0.1)".into()
    }
    pub fn call_budget() -> usize {
        1000
    }
    pub fn default_batch_size() -> usize {
        25
    }
    pub fn max_redirects() -> usize {
        5
    }
    pub fn sitemap_max_depth() -> usize {
        3
    }
    pub fn listener_threshold() -> usize {
        100
    }
    pub fn sitemap_timeout_ms() -> u64 {
        15_000
    }

    // Site defaults
    pub fn retention_days() -> u32 {
        30
    }
    pub fn timeout_ms() -> u64 {
        30_000
    }
    pub fn retries() -> u32 {
        2
    }
    pub fn retry_delay_ms() -> u64 {
        500
    }
    pub fn concurrency() -> usize {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_site_id() {
        let mut config = Config::default();
        config
            .sites
            .push(SiteConfig::with_sitemap("docs:main", "https://example.com/sitemap.xml"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_sites() {
        let mut config = Config::default();
        config
            .sites
            .push(SiteConfig::with_urls("docs", vec!["https://example.com/".into()]));
        config
            .sites
            .push(SiteConfig::with_urls("docs", vec!["https://example.com/b".into()]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_site_without_source() {
        let mut config = Config::default();
        config.sites.push(SiteConfig::with_urls("empty", Vec::new()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_http_sources() {
        let mut config = Config::default();
        config
            .sites
            .push(SiteConfig::with_sitemap("feed", "ftp://example.com/sitemap.xml"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sites.push(SiteConfig::with_urls(
            "pages",
            vec!["https://example.com/".into(), "/relative".into()],
        ));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("/relative"));

        let mut config = Config::default();
        config.sites.push(SiteConfig::with_urls(
            "pages",
            vec!["http://example.com/a".into(), " https://example.com/b ".into()],
        ));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_site_table_with_defaults() {
        let toml = r#"
            [crawler]
            call_budget = 500

            [[sites]]
            id = "docs"
            sitemap_url = "https://example.com/sitemap.xml"
            exclude_patterns = ["/tag/"]

            [sites.change_threshold]
            ignore_patterns = ["Build \\d+"]
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.crawler.call_budget, 500);
        assert_eq!(config.crawler.listener_threshold, 100);

        let site = config.site("docs").unwrap();
        assert!(site.is_sitemap_driven());
        assert_eq!(site.retention_days, 30);
        assert_eq!(site.fetch.retries, 2);
        assert_eq!(site.change_threshold.ignore_patterns, vec!["Build \\d+"]);
        assert!(config.validate().is_ok());
    }
}
