// src/services/sitemap.rs

//! Sitemap resolution.
//!
//! Walks a sitemap or sitemap-index tree breadth-first. Every sitemap URL
//! is fetched at most once per resolution (visited set), and nesting is
//! bounded by a maximum depth, so cyclic indexes always terminate.
//!
//! ```text
//! sitemap_index.xml (depth 0)
//! ├── pages.xml (depth 1)      -> <loc> page URLs
//! └── nested_index.xml (1)
//!     └── posts.xml (2)        -> <loc> page URLs
//! ```

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use log::{debug, info, warn};
use quick_xml::Reader;
use quick_xml::events::Event;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::models::{CrawlerConfig, FetchOptions, SitemapState};
use crate::services::fetcher::{ConditionalFetch, PageFetcher, Validators};
use crate::utils::url::{normalize_url, resolve};

/// Parsed sitemap document.
#[derive(Debug, Clone, PartialEq)]
pub enum SitemapDocument {
    /// `<urlset>`: page URLs
    UrlSet(Vec<String>),
    /// `<sitemapindex>`: child sitemap URLs
    Index(Vec<String>),
}

/// URL set produced by walking a sitemap tree.
#[derive(Debug, Clone, Default)]
pub struct SitemapResolution {
    /// Page URLs in discovery order, de-duplicated
    pub urls: Vec<String>,
    /// Failed or skipped branches
    pub warnings: Vec<String>,
    /// Distinct sitemap URLs visited
    pub sitemaps_visited: usize,
    /// HTTP requests issued for sitemaps
    pub fetch_count: usize,
}

/// Result of re-checking a sitemap against its last known state.
#[derive(Debug, Clone)]
pub enum SitemapCheck {
    /// Server confirmed the validators (304).
    NotModified,
    /// Fetched, but the `<loc>` set is identical.
    Unchanged { state: SitemapState },
    Changed {
        resolution: SitemapResolution,
        state: SitemapState,
    },
}

/// Resolves sitemap trees into page URL lists.
#[derive(Clone)]
pub struct SitemapResolver {
    fetcher: PageFetcher,
    max_depth: usize,
    options: FetchOptions,
}

impl SitemapResolver {
    pub fn new(fetcher: PageFetcher, config: &CrawlerConfig) -> Self {
        Self {
            fetcher,
            max_depth: config.sitemap_max_depth,
            options: FetchOptions {
                timeout_ms: config.sitemap_timeout_ms,
                retries: 1,
                retry_delay_ms: 250,
                concurrency: 1,
            },
        }
    }

    /// Resolve the full URL set below `url`.
    pub async fn resolve(&self, url: &str) -> Result<SitemapResolution> {
        self.walk(url, None).await
    }

    /// Resolve `url`, short-circuiting when it matches `previous`.
    ///
    /// The root request carries the stored validators. When the server
    /// ignores them, the tree is walked and its `<loc>` fingerprint is
    /// compared instead, so `<lastmod>`-only churn still reads as unchanged.
    pub async fn resolve_conditional(
        &self,
        url: &str,
        previous: Option<&SitemapState>,
    ) -> Result<SitemapCheck> {
        let validators = Validators {
            etag: previous.and_then(|s| s.etag.as_deref()),
            last_modified: previous.and_then(|s| s.last_modified.as_deref()),
        };

        let page = match self
            .fetcher
            .fetch_conditional(url, &self.options, validators)
            .await
            .map_err(|e| AppError::sitemap(url, e))?
        {
            ConditionalFetch::NotModified { .. } => {
                info!("Sitemap not modified: {}", url);
                return Ok(SitemapCheck::NotModified);
            }
            ConditionalFetch::Fetched(page) => page,
        };

        let mut resolution = self.walk(url, Some(page.body)).await?;
        resolution.fetch_count += 1;

        let state = SitemapState {
            etag: page.etag,
            last_modified: page.last_modified,
            content_hash: fingerprint(&resolution.urls),
            url_count: resolution.urls.len(),
            checked_at: Utc::now(),
        };

        match previous {
            Some(prev) if prev.content_hash == state.content_hash => {
                info!("Sitemap unchanged ({} URLs): {}", state.url_count, url);
                Ok(SitemapCheck::Unchanged { state })
            }
            _ => Ok(SitemapCheck::Changed { resolution, state }),
        }
    }

    /// Breadth-first walk. `root_body` skips the first fetch when the caller already has it.
    async fn walk(&self, root: &str, mut root_body: Option<String>) -> Result<SitemapResolution> {
        let mut resolution = SitemapResolution::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut failures = 0usize;

        queue.push_back((root.to_string(), 0));

        while let Some((sitemap_url, depth)) = queue.pop_front() {
            if !visited.insert(normalize_url(&sitemap_url)) {
                debug!("Already visited sitemap: {}", sitemap_url);
                continue;
            }
            if depth > self.max_depth {
                resolution.warnings.push(format!(
                    "{}: skipped, nesting deeper than {}",
                    sitemap_url, self.max_depth
                ));
                continue;
            }
            resolution.sitemaps_visited += 1;
            let is_root = depth == 0;

            let body = match root_body.take() {
                Some(body) if is_root => body,
                _ => {
                    resolution.fetch_count += 1;
                    match self.fetcher.fetch(&sitemap_url, &self.options).await {
                        Ok(page) => page.body,
                        Err(e) if is_root => return Err(AppError::sitemap(root, e)),
                        Err(e) => {
                            warn!("Child sitemap failed: {}", e);
                            resolution.warnings.push(format!("{}: {}", sitemap_url, e));
                            failures += 1;
                            continue;
                        }
                    }
                }
            };

            match parse_sitemap(&body) {
                Ok(SitemapDocument::UrlSet(locs)) => {
                    debug!("{} URLs in {}", locs.len(), sitemap_url);
                    for loc in locs {
                        let Some(page_url) = resolve(&sitemap_url, &loc) else {
                            continue;
                        };
                        if seen_urls.insert(page_url.clone()) {
                            resolution.urls.push(page_url);
                        }
                    }
                }
                Ok(SitemapDocument::Index(children)) => {
                    debug!("{} child sitemaps in {}", children.len(), sitemap_url);
                    for child in children {
                        if let Some(child_url) = resolve(&sitemap_url, &child) {
                            if !visited.contains(&normalize_url(&child_url)) {
                                queue.push_back((child_url, depth + 1));
                            }
                        }
                    }
                }
                Err(e) if is_root => return Err(AppError::sitemap(root, e)),
                Err(e) => {
                    resolution.warnings.push(format!("{}: {}", sitemap_url, e));
                    failures += 1;
                }
            }
        }

        if resolution.urls.is_empty() && failures > 0 {
            return Err(AppError::sitemap(
                root,
                format!("no URLs resolved, {} sitemap(s) failed", failures),
            ));
        }

        info!(
            "Resolved {} URLs from {} sitemap(s) under {}",
            resolution.urls.len(),
            resolution.sitemaps_visited,
            root
        );
        Ok(resolution)
    }
}

/// SHA-256 over the sorted, de-duplicated URL set.
pub fn fingerprint(urls: &[String]) -> String {
    let mut sorted: Vec<&str> = urls.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    for url in sorted {
        hasher.update(url.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Parse a sitemap body, detecting `<urlset>` vs `<sitemapindex>` from the root element.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut is_index: Option<bool> = None;
    let mut in_entry = false;
    let mut in_loc = false;
    let mut locs: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match (is_index, name.as_str()) {
                    (None, "urlset") => is_index = Some(false),
                    (None, "sitemapindex") => is_index = Some(true),
                    (None, other) => {
                        return Err(AppError::validation(format!(
                            "not a sitemap: unexpected root <{other}>"
                        )));
                    }
                    (Some(false), "url") | (Some(true), "sitemap") => in_entry = true,
                    (Some(_), "loc") if in_entry => in_loc = true,
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) if is_index.is_none() => {
                // <urlset/> is a valid, empty sitemap
                match e.local_name().as_ref() {
                    b"urlset" => return Ok(SitemapDocument::UrlSet(Vec::new())),
                    b"sitemapindex" => return Ok(SitemapDocument::Index(Vec::new())),
                    other => {
                        return Err(AppError::validation(format!(
                            "not a sitemap: unexpected root <{}>",
                            String::from_utf8_lossy(other)
                        )));
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"url" | b"sitemap" => in_entry = false,
                _ => {}
            },
            Ok(Event::Text(e)) if in_loc => {
                let text = e
                    .unescape()
                    .map_err(|e| AppError::validation(format!("bad <loc> text: {e}")))?;
                push_loc(&mut locs, &text);
            }
            Ok(Event::CData(e)) if in_loc => {
                push_loc(&mut locs, &String::from_utf8_lossy(&e));
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AppError::validation(format!(
                    "XML parse error at {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    match is_index {
        Some(true) => Ok(SitemapDocument::Index(locs)),
        Some(false) => Ok(SitemapDocument::UrlSet(locs)),
        None => Err(AppError::validation("not a sitemap: no root element")),
    }
}

fn push_loc(locs: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        locs.push(trimmed.to_string());
    }
}
