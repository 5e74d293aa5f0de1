// src/services/fetcher.rs

//! Page fetcher with retries, manual redirects and conditional requests.

use std::time::{Duration, Instant};

use log::{debug, warn};
use reqwest::header::{CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LOCATION};
use reqwest::{Client, StatusCode};

use crate::error::{AppError, Result};
use crate::models::{CrawlerConfig, FetchOptions};
use crate::utils::http::{create_async_client, header_string};
use crate::utils::url::resolve;

/// A successfully fetched document.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested
    pub url: String,
    /// URL the content was served from after redirects
    pub final_url: String,
    pub status: u16,
    pub body: String,
    /// Declared `Content-Type` header
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub redirect_count: u32,
    pub duration_ms: u64,
}

/// Result of a request carrying cache validators.
#[derive(Debug, Clone)]
pub enum ConditionalFetch {
    /// Server answered 304.
    NotModified {
        etag: Option<String>,
        last_modified: Option<String>,
    },
    Fetched(FetchedPage),
}

/// Validators sent with a conditional request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validators<'a> {
    pub etag: Option<&'a str>,
    pub last_modified: Option<&'a str>,
}

impl Validators<'_> {
    fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// HTTP fetcher shared by the sitemap resolver and the batch crawler.
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
    max_redirects: usize,
}

impl PageFetcher {
    /// Create a fetcher from engine settings.
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            max_redirects: config.max_redirects,
        })
    }

    /// Fetch a URL, retrying failures with exponential backoff.
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage> {
        match self
            .fetch_conditional(url, options, Validators::default())
            .await?
        {
            ConditionalFetch::Fetched(page) => Ok(page),
            // Without validators a 304 already fails in `fetch_once`.
            ConditionalFetch::NotModified { .. } => {
                Err(AppError::fetch(url, "HTTP 304 without validators"))
            }
        }
    }

    /// Fetch a URL with optional cache validators, retrying failures.
    pub async fn fetch_conditional(
        &self,
        url: &str,
        options: &FetchOptions,
        validators: Validators<'_>,
    ) -> Result<ConditionalFetch> {
        let mut attempt: u32 = 0;
        loop {
            match self.fetch_once(url, options.timeout_ms, validators).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < options.retries => {
                    let delay = backoff_delay(options.retry_delay_ms, attempt);
                    warn!(
                        "Fetch {} failed (attempt {}/{}): {}. Retrying in {}ms",
                        url,
                        attempt + 1,
                        options.retries + 1,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single attempt, following redirects by hand.
    async fn fetch_once(
        &self,
        url: &str,
        timeout_ms: u64,
        validators: Validators<'_>,
    ) -> Result<ConditionalFetch> {
        let started = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        let mut current = url.to_string();
        let mut redirect_count: u32 = 0;

        loop {
            let mut request = self.client.get(&current).timeout(timeout);
            if let Some(etag) = validators.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = validators.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }

            let response = request
                .send()
                .await
                .map_err(|e| AppError::fetch(&current, describe(&e)))?;
            let status = response.status();
            let headers = response.headers().clone();

            if status == StatusCode::NOT_MODIFIED {
                if validators.is_empty() {
                    return Err(AppError::fetch(&current, "HTTP 304 without validators"));
                }
                debug!("Not modified (304): {}", current);
                return Ok(ConditionalFetch::NotModified {
                    etag: header_string(&headers, ETAG),
                    last_modified: header_string(&headers, LAST_MODIFIED),
                });
            }

            if status.is_redirection() {
                let location = header_string(&headers, LOCATION).ok_or_else(|| {
                    AppError::fetch(&current, format!("HTTP {} without Location", status.as_u16()))
                })?;
                if redirect_count as usize >= self.max_redirects {
                    return Err(AppError::fetch(
                        url,
                        format!("too many redirects (max {})", self.max_redirects),
                    ));
                }
                let next = resolve(&current, &location).ok_or_else(|| {
                    AppError::fetch(&current, format!("invalid redirect target '{location}'"))
                })?;
                debug!("Redirect {} -> {}", current, next);
                current = next;
                redirect_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(AppError::fetch(&current, format!("HTTP {}", status.as_u16())));
            }

            let body = response
                .text()
                .await
                .map_err(|e| AppError::fetch(&current, describe(&e)))?;

            return Ok(ConditionalFetch::Fetched(FetchedPage {
                url: url.to_string(),
                final_url: current,
                status: status.as_u16(),
                body,
                content_type: header_string(&headers, CONTENT_TYPE),
                etag: header_string(&headers, ETAG),
                last_modified: header_string(&headers, LAST_MODIFIED),
                redirect_count,
                duration_ms: started.elapsed().as_millis() as u64,
            }));
        }
    }
}

/// `base * 2^attempt`, saturating.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}
