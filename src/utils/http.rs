// src/utils/http.rs

//! HTTP client utilities.

use reqwest::header::{HeaderMap, HeaderName};
use reqwest::redirect::Policy;

use crate::error::Result;
use crate::models::CrawlerConfig;

/// Create the shared asynchronous HTTP client.
///
/// Redirects are disabled at the client level; the fetcher follows them
/// itself so it can count hops. Timeouts are set per request.
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .redirect(Policy::none())
        .build()?;
    Ok(client)
}

/// Header value as an owned string, if present and valid ASCII.
pub fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
