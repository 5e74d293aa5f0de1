// src/pipeline/batch.rs

//! Resumable batch crawl orchestrator.
//!
//! One invocation processes one slice of a site's URL set and checkpoints
//! where the next invocation should continue:
//!
//! ```text
//! Idle ──▶ Scanning (offset 0) ──▶ InProgress (offset > 0) ──▶ CycleComplete
//!   ▲                                                              │
//!   └──────────── next day, or sitemap <loc> set changes ──────────┘
//! ```
//!
//! The processing set is resolved once at offset 0 and cached, so every
//! continuation slices the same list. Per-URL failures are recorded in the
//! result and never abort the batch.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use regex::Regex;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    BackupMetadata, BatchOptions, BatchProgress, BatchProgressReport, BatchedResult, CrawlState,
    CrawlerConfig, FailureStage, ListenerSnapshot, ListenerState, SiteConfig, SkipReason,
    UrlOutcome,
};
use crate::pipeline::retention;
use crate::services::{
    ChangeDetector, ContentNormalizer, PageFetcher, SitemapCheck, SitemapResolver,
    detect_content_type, sha256_hex,
};
use crate::storage::{KvStore, SiteStore, keys};

/// Upper bound on URLs per batch regardless of budget.
pub const MAX_BATCH_SIZE: usize = 50;

/// Calls held back from the budget for sitemap, progress and retention work.
pub const RESERVED_CALLS: usize = 100;

/// Key-value operations per fetched URL: read `latest`, write backup, meta,
/// `prev_latest` and `latest`.
pub const KV_OPS_PER_URL: usize = 5;

/// Hard cap on parallel fetches, independent of site configuration.
pub const MAX_FETCH_CONCURRENCY: usize = 6;

/// Locale path segments (`/en/`, `/fr-ca/`, `/pt_BR`) excluded from every site.
static LOCALE_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"/(?:en|fr|de|es|it|pt|nl|ja|zh|ko|ru|ar|pl|sv|tr)(?:[-_][a-zA-Z]{2})?(?:/|$)",
    )
    .unwrap_or_else(|e| panic!("locale pattern: {e}"))
});

/// Largest batch that fits the call budget.
pub fn max_safe_batch_size(call_budget: usize) -> usize {
    let per_url = 1 + KV_OPS_PER_URL;
    (call_budget.saturating_sub(RESERVED_CALLS) / per_url).clamp(1, MAX_BATCH_SIZE)
}

/// Drives batched crawls for configured sites.
#[derive(Clone)]
pub struct BatchCrawler {
    store: SiteStore,
    fetcher: PageFetcher,
    resolver: SitemapResolver,
    settings: CrawlerConfig,
}

impl BatchCrawler {
    /// Create a crawler over a key-value store.
    pub fn new(kv: Arc<dyn KvStore>, settings: CrawlerConfig) -> Result<Self> {
        let fetcher = PageFetcher::new(&settings)?;
        let resolver = SitemapResolver::new(fetcher.clone(), &settings);
        Ok(Self {
            store: SiteStore::new(kv),
            fetcher,
            resolver,
            settings,
        })
    }

    pub fn store(&self) -> &SiteStore {
        &self.store
    }

    pub fn settings(&self) -> &CrawlerConfig {
        &self.settings
    }

    /// Requested batch size clamped to `[1, max_safe_batch_size]`.
    pub fn effective_batch_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.settings.default_batch_size)
            .clamp(1, max_safe_batch_size(self.settings.call_budget))
    }

    /// Run one batch for a site. Never fails; problems land in `errors`.
    pub async fn perform_batch(&self, site: &SiteConfig, options: BatchOptions) -> BatchedResult {
        let started = Instant::now();
        let batch_size = self.effective_batch_size(options.batch_size);

        let mut result = match self.run_batch(site, &options, batch_size).await {
            Ok(result) => result,
            Err(e) => {
                error!("Batch for {} aborted: {}", site.id, e);
                let mut result = BatchedResult::empty(
                    &site.id,
                    options.batch_offset.unwrap_or(0),
                    batch_size,
                );
                result.errors.push(e.to_string());
                result
            }
        };
        result.execution_time = started.elapsed().as_millis() as u64;

        info!(
            "Site {}: processed {}/{} from offset {} ({} changed, {} failed) in {}ms",
            site.id,
            result.processed_in_batch,
            result.total_urls,
            result.batch_offset,
            result.changed_urls.len(),
            result.failed_backups,
            result.execution_time
        );
        result
    }

    /// Forget batch progress, today's full scan and the cached URL set.
    ///
    /// Listener state and the sitemap fingerprint are kept.
    pub async fn reset_progress(&self, site_id: &str) -> Result<()> {
        self.store.clear_progress(site_id).await?;
        self.store.clear_full_scan(site_id).await?;
        self.store.clear_url_set(site_id).await?;
        info!("Reset batch progress for {}", site_id);
        Ok(())
    }

    async fn run_batch(
        &self,
        site: &SiteConfig,
        options: &BatchOptions,
        batch_size: usize,
    ) -> Result<BatchedResult> {
        let stored = if options.continue_from_last {
            self.store.progress(&site.id).await?
        } else {
            None
        };
        let offset = match &stored {
            Some(progress) => progress.next_offset,
            None => options.batch_offset.unwrap_or(0),
        };
        let mut result = BatchedResult::empty(&site.id, offset, batch_size);

        let urls = if offset == 0 {
            match self.start_cycle(site, &mut result).await? {
                Some(urls) => urls,
                None => return Ok(result),
            }
        } else {
            if site.is_sitemap_driven() && self.store.listener(&site.id).await?.is_some() {
                result.listener_mode = true;
            }
            match self.store.url_set(&site.id).await? {
                Some(urls) => urls,
                None => {
                    if result.listener_mode {
                        warn!("Listener URL set for {} expired at offset {}", site.id, offset);
                        result
                            .warnings
                            .push("listener URL set expired, new URLs picked up next cycle".into());
                        self.complete_cycle(&site.id, 0, &mut result).await;
                        return Ok(result);
                    }
                    warn!(
                        "URL set cache for {} missing at offset {}, re-resolving",
                        site.id, offset
                    );
                    match self.resolve_urls(site, &mut result).await {
                        Some(urls) if !urls.is_empty() => urls,
                        _ => {
                            result.state = CrawlState::Idle;
                            result.skip_reason = Some(SkipReason::ResolutionFailed);
                            return Ok(result);
                        }
                    }
                }
            }
        };

        let total = urls.len();
        let start = offset.min(total);
        let end = start.saturating_add(batch_size).min(total);
        result.total_urls = total;
        result.batch_offset = start;

        self.process_urls(site, &urls[start..end], &mut result).await;
        result.processed_in_batch = end - start;
        if result.listener_mode {
            self.commit_listener_batch(&site.id, &mut result).await;
        }

        if start == 0 {
            let today = Utc::now().date_naive();
            match retention::cleanup(self.store.kv(), &site.id, site.retention_days, today).await {
                Ok(report) if report.deleted > 0 => debug!("Retention: {:?}", report),
                Ok(_) => {}
                Err(e) => result.warnings.push(format!("retention cleanup failed: {e}")),
            }
        }

        let next_offset = start + result.processed_in_batch;
        result.next_offset = next_offset;
        result.progress = BatchProgressReport::new(next_offset, total);

        if next_offset < total {
            let progress = BatchProgress {
                next_offset,
                total_urls: total,
                last_run: Utc::now(),
            };
            if let Err(e) = self.store.save_progress(&site.id, &progress).await {
                result.errors.push(format!("failed to save progress: {e}"));
            }
            result.has_more = true;
            result.state = if start == 0 {
                CrawlState::Scanning
            } else {
                CrawlState::InProgress
            };
        } else {
            self.complete_cycle(&site.id, total, &mut result).await;
        }
        Ok(result)
    }

    /// Offset-0 work: same-day short-circuit, resolution, listener mode and caching.
    ///
    /// Returns `None` when the invocation has nothing to fetch.
    async fn start_cycle(
        &self,
        site: &SiteConfig,
        result: &mut BatchedResult,
    ) -> Result<Option<Vec<String>>> {
        let today = keys::today();
        let scanned_today = self
            .store
            .full_scan(&site.id)
            .await?
            .is_some_and(|scan| scan.date == today);

        // Saved only once the cycle's URL set is stored, so an aborted start
        // is re-resolved on the next run.
        let mut sitemap_state = None;
        let resolved = match sitemap_url(site) {
            Some(sitemap_url) => {
                let previous = if scanned_today {
                    self.store.sitemap_state(&site.id).await?
                } else {
                    None
                };
                match self
                    .resolver
                    .resolve_conditional(sitemap_url, previous.as_ref())
                    .await
                {
                    Ok(SitemapCheck::NotModified) => {
                        self.skip(result, SkipReason::SitemapUnchanged);
                        return Ok(None);
                    }
                    Ok(SitemapCheck::Unchanged { state }) => {
                        self.store.save_sitemap_state(&site.id, &state).await?;
                        self.skip(result, SkipReason::SitemapUnchanged);
                        return Ok(None);
                    }
                    Ok(SitemapCheck::Changed { resolution, state }) => {
                        sitemap_state = Some(state);
                        result.warnings.extend(resolution.warnings);
                        resolution.urls
                    }
                    Err(e) => {
                        warn!("Sitemap resolution failed for {}: {}", site.id, e);
                        result.errors.push(e.to_string());
                        result.skip_reason = Some(SkipReason::ResolutionFailed);
                        return Ok(None);
                    }
                }
            }
            None if scanned_today => {
                self.skip(result, SkipReason::AlreadyScannedToday);
                return Ok(None);
            }
            None => dedup(site.urls.clone()),
        };

        let mut urls = self.filter_urls(site, resolved, result);

        if site.is_sitemap_driven() {
            match self.apply_listener(site, urls, result).await? {
                Some(fresh) => urls = fresh,
                None => {
                    if let Some(state) = &sitemap_state {
                        self.store.save_sitemap_state(&site.id, state).await?;
                    }
                    return Ok(None);
                }
            }
        }

        if urls.is_empty() && !result.listener_mode {
            result
                .errors
                .push(format!("no URLs to crawl for site {}", site.id));
            result.skip_reason = Some(SkipReason::ResolutionFailed);
            return Ok(None);
        }

        self.store.save_url_set(&site.id, &urls).await?;
        if let Some(state) = &sitemap_state {
            self.store.save_sitemap_state(&site.id, state).await?;
        }
        Ok(Some(urls))
    }

    /// Mark an invocation that completed without page work.
    fn skip(&self, result: &mut BatchedResult, reason: SkipReason) {
        info!("Site {}: nothing to do ({:?})", result.site_id, reason);
        result.skip_reason = Some(reason);
        result.state = CrawlState::CycleComplete;
        result.progress = BatchProgressReport::new(0, 0);
    }

    /// Re-resolve a site's URL set without listener bookkeeping.
    async fn resolve_urls(&self, site: &SiteConfig, result: &mut BatchedResult) -> Option<Vec<String>> {
        let resolved = match sitemap_url(site) {
            Some(sitemap_url) => match self.resolver.resolve(sitemap_url).await {
                Ok(resolution) => {
                    result.warnings.extend(resolution.warnings);
                    resolution.urls
                }
                Err(e) => {
                    result.errors.push(e.to_string());
                    return None;
                }
            },
            None => dedup(site.urls.clone()),
        };
        let urls = self.filter_urls(site, resolved, result);
        if let Err(e) = self.store.save_url_set(&site.id, &urls).await {
            result.warnings.push(format!("failed to cache URL set: {e}"));
        }
        Some(urls)
    }

    /// Drop locale paths and site exclusions.
    fn filter_urls(&self, site: &SiteConfig, urls: Vec<String>, result: &mut BatchedResult) -> Vec<String> {
        let mut exclusions = Vec::new();
        for pattern in &site.exclude_patterns {
            match Regex::new(pattern) {
                Ok(re) => exclusions.push(re),
                Err(e) => {
                    warn!("Skipping invalid exclude pattern '{}' for {}: {}", pattern, site.id, e);
                    result
                        .warnings
                        .push(format!("invalid exclude pattern '{pattern}': {e}"));
                }
            }
        }

        let before = urls.len();
        let kept: Vec<String> = urls
            .into_iter()
            .filter(|url| {
                let path = Url::parse(url)
                    .map(|u| u.path().to_string())
                    .unwrap_or_else(|_| url.clone());
                !LOCALE_SEGMENT.is_match(&path) && !exclusions.iter().any(|re| re.is_match(url))
            })
            .collect();
        if kept.len() != before {
            debug!("Excluded {} of {} URLs for {}", before - kept.len(), before, site.id);
        }
        kept
    }

    /// Large-site handling. Returns the URLs that are new since the snapshot,
    /// all URLs when listener mode does not apply, or `None` when this run
    /// only recorded the initial snapshot.
    async fn apply_listener(
        &self,
        site: &SiteConfig,
        urls: Vec<String>,
        result: &mut BatchedResult,
    ) -> Result<Option<Vec<String>>> {
        let listener = self.store.listener(&site.id).await?;
        let threshold = self.settings.listener_threshold;
        if listener.is_none() && urls.len() <= threshold {
            return Ok(Some(urls));
        }
        result.listener_mode = true;

        let now = Utc::now();
        let Some(snapshot) = self.store.listener_snapshot(&site.id).await? else {
            info!(
                "Site {} has {} URLs (threshold {}), entering listener mode",
                site.id,
                urls.len(),
                threshold
            );
            if listener.is_none() {
                let state = ListenerState {
                    enabled_at: now,
                    threshold,
                    initial_url_count: urls.len(),
                };
                self.store.save_listener(&site.id, &state).await?;
            }
            let snapshot = ListenerSnapshot {
                urls,
                updated_at: now,
            };
            self.store.save_listener_snapshot(&site.id, &snapshot).await?;
            self.store.mark_full_scan(&site.id, 0).await?;
            self.skip(result, SkipReason::ListenerSnapshotCreated);
            return Ok(None);
        };

        let known: HashSet<&str> = snapshot.urls.iter().map(String::as_str).collect();
        let fresh: Vec<String> = urls
            .iter()
            .filter(|url| !known.contains(url.as_str()))
            .cloned()
            .collect();
        info!(
            "Site {} (listener): {} new of {} URLs",
            site.id,
            fresh.len(),
            urls.len()
        );

        // New URLs join the snapshot only once stored; removals apply now.
        let live: HashSet<&str> = urls.iter().map(String::as_str).collect();
        let kept: Vec<String> = snapshot
            .urls
            .iter()
            .filter(|url| live.contains(url.as_str()))
            .cloned()
            .collect();
        if kept.len() != snapshot.urls.len() {
            let pruned = ListenerSnapshot {
                urls: kept,
                updated_at: now,
            };
            self.store.save_listener_snapshot(&site.id, &pruned).await?;
        }
        Ok(Some(fresh))
    }

    /// Add this batch's stored URLs to the listener snapshot. Failed URLs
    /// stay out of it, and the sitemap fingerprint is dropped so the next
    /// run picks them up again.
    async fn commit_listener_batch(&self, site_id: &str, result: &mut BatchedResult) {
        let stored: Vec<&str> = result
            .results
            .iter()
            .filter_map(|outcome| match outcome {
                UrlOutcome::Success { url, .. } => Some(url.as_str()),
                UrlOutcome::Failure { .. } => None,
            })
            .collect();

        if !stored.is_empty() {
            let committed: Result<()> = async {
                let mut snapshot = self
                    .store
                    .listener_snapshot(site_id)
                    .await?
                    .unwrap_or_else(|| ListenerSnapshot {
                        urls: Vec::new(),
                        updated_at: Utc::now(),
                    });
                let known: HashSet<String> = snapshot.urls.iter().cloned().collect();
                snapshot.urls.extend(
                    stored
                        .iter()
                        .filter(|url| !known.contains(**url))
                        .map(|url| url.to_string()),
                );
                snapshot.updated_at = Utc::now();
                self.store.save_listener_snapshot(site_id, &snapshot).await
            }
            .await;
            if let Err(e) = committed {
                warn!("Listener snapshot update failed for {}: {}", site_id, e);
                result
                    .errors
                    .push(format!("failed to update listener snapshot: {e}"));
            }
        }

        if result.failed_backups > 0 {
            if let Err(e) = self.store.clear_sitemap_state(site_id).await {
                result
                    .warnings
                    .push(format!("failed to reset sitemap state: {e}"));
            }
        }
    }

    /// Fetch and store a slice in chunks of bounded concurrency.
    async fn process_urls(&self, site: &SiteConfig, urls: &[String], result: &mut BatchedResult) {
        let concurrency = site.fetch.concurrency.clamp(1, MAX_FETCH_CONCURRENCY);
        let normalizer = ContentNormalizer::new(&site.change_threshold.ignore_patterns);
        let detector = ChangeDetector::new(&site.change_threshold);
        debug!(
            "{}: {} URL(s), {} ignore pattern(s), {} at a time",
            site.id,
            urls.len(),
            normalizer.pattern_count(),
            concurrency
        );

        for chunk in urls.chunks(concurrency) {
            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|url| self.process_url(site, url, &normalizer, &detector)),
            )
            .await;
            for outcome in outcomes {
                result.record(outcome);
            }
        }
    }

    async fn process_url(
        &self,
        site: &SiteConfig,
        url: &str,
        normalizer: &ContentNormalizer,
        detector: &ChangeDetector,
    ) -> UrlOutcome {
        let page = match self.fetcher.fetch(url, &site.fetch).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Fetch failed for {}: {}", url, e);
                return failure(url, FailureStage::Fetch, &e);
            }
        };

        let content_type = detect_content_type(page.content_type.as_deref(), &page.body);
        let normalized = normalizer.normalize(&page.body, content_type);
        let metadata = BackupMetadata {
            url: url.to_string(),
            timestamp: Utc::now(),
            content_hash: sha256_hex(&page.body),
            normalized_hash: Some(normalized.hash),
            status: page.status,
            content_type,
            etag: page.etag,
            size: page.body.len(),
            normalized_size: Some(normalized.content.len()),
            fetch_duration_ms: page.duration_ms,
            redirect_count: page.redirect_count,
            final_url: (page.final_url != url).then_some(page.final_url),
        };

        let stored = async {
            let previous = self.store.latest(&site.id, url).await?;
            let verdict = detector.detect(&metadata, previous.as_ref());
            self.store
                .store_snapshot(&site.id, &page.body, &metadata, previous.as_ref())
                .await?;
            Ok::<_, AppError>(verdict)
        }
        .await;

        match stored {
            Ok(verdict) => {
                debug!("Stored {} ({:?})", url, verdict);
                UrlOutcome::Success {
                    url: url.to_string(),
                    metadata,
                    changed: verdict.is_changed(),
                }
            }
            Err(e) => {
                error!("Store failed for {}: {}", url, e);
                failure(url, FailureStage::Store, &e)
            }
        }
    }

    /// Last batch of a cycle: clear checkpoints, mark today's scan done.
    async fn complete_cycle(&self, site_id: &str, total: usize, result: &mut BatchedResult) {
        let steps = [
            ("clear progress", self.store.clear_progress(site_id).await),
            ("clear URL set", self.store.clear_url_set(site_id).await),
            ("mark full scan", self.store.mark_full_scan(site_id, total).await),
        ];
        for (step, outcome) in steps {
            if let Err(e) = outcome {
                result.errors.push(format!("failed to {step}: {e}"));
            }
        }
        result.has_more = false;
        result.state = CrawlState::CycleComplete;
        info!("Site {}: cycle complete ({} URLs)", site_id, total);
    }
}

fn failure(url: &str, stage: FailureStage, e: &AppError) -> UrlOutcome {
    UrlOutcome::Failure {
        url: url.to_string(),
        stage,
        error: e.to_string(),
    }
}

fn sitemap_url(site: &SiteConfig) -> Option<&str> {
    site.sitemap_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
}

fn dedup(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty() && seen.insert(u.clone()))
        .collect()
}
