// src/error.rs

//! Unified error handling for the crawl engine.

use std::fmt;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Regex compilation failed
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Page fetch failed (timeout, network failure, non-2xx)
    #[error("Fetch error for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Key-value store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// Sitemap could not be resolved
    #[error("Sitemap error for {url}: {message}")]
    Sitemap { url: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a fetch error for a URL.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create a sitemap resolution error.
    pub fn sitemap(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Sitemap {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error came from the key-value store (or payload encoding for it).
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Json(_) | Self::Io(_))
    }

    /// Whether this error came from the network side.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Http(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(AppError::store("disk full").is_store());
        assert!(!AppError::store("disk full").is_fetch());
        assert!(AppError::fetch("https://example.com", "timeout").is_fetch());
        assert!(!AppError::config("bad").is_store());
    }

    #[test]
    fn test_error_display() {
        let err = AppError::fetch("https://example.com/a", "HTTP 503");
        assert_eq!(err.to_string(), "Fetch error for https://example.com/a: HTTP 503");

        let err = AppError::sitemap("https://example.com/sitemap.xml", "not XML");
        assert!(err.to_string().contains("sitemap.xml"));
    }
}
