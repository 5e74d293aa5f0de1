//! End-to-end batch scenarios against a mock site.

mod common;

use std::sync::Arc;

use serde_json::json;
use sitewatch::models::{
    BatchOptions, BatchProgress, Config, CrawlState, FailureStage, ListenerSnapshot, SkipReason,
    UrlOutcome,
};
use sitewatch::pipeline::{InvocationRequest, handle_invocation};
use sitewatch::storage::{KvStore, MemoryStore, keys};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

#[tokio::test]
async fn test_first_run_reports_every_url_changed() {
    let server = MockServer::start().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 2, "2026-01-01")).await;
    mount_pages(&server, &html("Home", "Welcome")).await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let site = sitemap_site("docs", &server);

    let result = crawler.perform_batch(&site, BatchOptions::default()).await;

    assert_eq!(result.total_urls, 2);
    assert_eq!(result.processed_in_batch, 2);
    assert_eq!(result.successful_backups, 2);
    assert_eq!(result.changed_urls.len(), 2);
    assert!(!result.has_more);
    assert_eq!(result.state, CrawlState::CycleComplete);
    assert_eq!(result.progress.percent_complete, 100.0);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    assert_eq!(store.keys_with_prefix("latest:docs:").await.len(), 2);
    assert_eq!(store.keys_with_prefix("backup:docs:").await.len(), 2);
    assert!(store.get(&keys::full_scan("docs")).await.unwrap().is_some());
    assert!(store.get(&keys::batch_progress("docs")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_lastmod_churn_fetches_no_pages() {
    let server = MockServer::start().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 2, "2026-01-01")).await;
    mount_pages(&server, &html("Home", "Welcome")).await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let site = sitemap_site("docs", &server);

    let first = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert_eq!(first.total_urls, 2);

    server.reset().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 2, "2026-02-15")).await;
    mount_pages(&server, &html("Home", "Welcome")).await;
    let before = page_requests(&server).await;

    let second = crawler.perform_batch(&site, BatchOptions::default()).await;

    assert_eq!(second.total_urls, 0);
    assert_eq!(second.processed_in_batch, 0);
    assert_eq!(second.skip_reason, Some(SkipReason::SitemapUnchanged));
    assert_eq!(second.state, CrawlState::CycleComplete);
    assert_eq!(page_requests(&server).await, before);
}

#[tokio::test]
async fn test_listener_mode_fetches_only_new_urls() {
    let server = MockServer::start().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 101, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let site = sitemap_site("big", &server);

    let first = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert!(first.listener_mode);
    assert_eq!(first.skip_reason, Some(SkipReason::ListenerSnapshotCreated));
    assert_eq!(first.processed_in_batch, 0);
    assert_eq!(page_requests(&server).await, 0);
    assert!(store.get(&keys::sitemap_snapshot("big")).await.unwrap().is_some());
    assert!(store.get(&keys::sitemap_listener("big")).await.unwrap().is_some());

    server.reset().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 102, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let second = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert!(second.listener_mode);
    assert_eq!(second.total_urls, 1);
    assert_eq!(second.processed_in_batch, 1);
    assert_eq!(second.changed_urls, vec![page_url(&server, 101)]);
    assert_eq!(second.state, CrawlState::CycleComplete);
    assert_eq!(page_requests(&server).await, 1);
}

#[tokio::test]
async fn test_continuations_cover_the_url_set_exactly_once() {
    let server = MockServer::start().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 7, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let site = sitemap_site("docs", &server);

    let mut options = BatchOptions {
        batch_size: Some(3),
        ..BatchOptions::default()
    };
    let mut processed = 0;
    let mut states = Vec::new();
    let mut total = 0;
    for _ in 0..10 {
        let result = crawler.perform_batch(&site, options.clone()).await;
        processed += result.processed_in_batch;
        total = result.total_urls;
        states.push(result.state);
        if !result.has_more {
            break;
        }
        assert_eq!(result.next_offset, processed);
        options = BatchOptions {
            batch_size: Some(3),
            ..BatchOptions::resume()
        };
    }

    assert_eq!(total, 7);
    assert_eq!(processed, 7);
    assert_eq!(
        states,
        vec![
            CrawlState::Scanning,
            CrawlState::InProgress,
            CrawlState::CycleComplete
        ]
    );
    assert_eq!(page_requests(&server).await, 7);
    assert!(store.keys_with_prefix("url_set").await.is_empty());
    assert!(store.get(&keys::batch_progress("docs")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_url_list_site_runs_once_per_day() {
    let server = MockServer::start().await;
    mount_pages(&server, &html("Page", "Body")).await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let site = list_site("list", vec![page_url(&server, 1), page_url(&server, 2)]);

    let first = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert_eq!(first.successful_backups, 2);

    let second = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert_eq!(second.skip_reason, Some(SkipReason::AlreadyScannedToday));
    assert_eq!(second.processed_in_batch, 0);
    assert_eq!(page_requests(&server).await, 2);
}

#[tokio::test]
async fn test_noise_only_changes_are_not_reported() {
    let server = MockServer::start().await;
    mount_pages(
        &server,
        &html("News", "Rendered at 2026-01-01T10:00:00Z for session 123e4567-e89b-12d3-a456-426614174000"),
    )
    .await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let site = list_site("news", vec![page_url(&server, 1)]);

    let first = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert_eq!(first.changed_urls.len(), 1);

    server.reset().await;
    mount_pages(
        &server,
        &html("News", "Rendered at 2026-01-02T08:30:00Z for session 9b2f8c1e-0d3a-4c5b-8e7f-112233445566"),
    )
    .await;
    crawler.reset_progress("news").await.unwrap();
    let second = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert_eq!(second.successful_backups, 1);
    assert!(second.changed_urls.is_empty());

    server.reset().await;
    mount_pages(&server, &html("Breaking news", "Something happened")).await;
    crawler.reset_progress("news").await.unwrap();
    let third = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert_eq!(third.changed_urls, vec![page_url(&server, 1)]);
}

#[tokio::test]
async fn test_store_failures_are_counted_and_do_not_halt() {
    let server = MockServer::start().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 3, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let store = Arc::new(MemoryStore::with_write_failures("backup:"));
    let crawler = crawler(store.clone());
    let site = sitemap_site("docs", &server);

    let result = crawler.perform_batch(&site, BatchOptions::default()).await;

    assert_eq!(result.processed_in_batch, 3);
    assert_eq!(result.successful_backups, 0);
    assert_eq!(result.failed_backups, 3);
    assert_eq!(result.store_failures, 3);
    assert!(result.results.iter().all(|r| matches!(
        r,
        UrlOutcome::Failure {
            stage: FailureStage::Store,
            ..
        }
    )));
    assert_eq!(page_requests(&server).await, 3);
}

#[tokio::test]
async fn test_fetch_failure_is_isolated_to_its_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page-0"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_pages(&server, &html("Page", "Body")).await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let site = list_site("mixed", vec![page_url(&server, 0), page_url(&server, 1)]);

    let result = crawler.perform_batch(&site, BatchOptions::default()).await;

    assert_eq!(result.successful_backups, 1);
    assert_eq!(result.failed_backups, 1);
    assert_eq!(result.store_failures, 0);
    assert_eq!(result.changed_urls, vec![page_url(&server, 1)]);
    assert!(result.errors.iter().any(|e| e.contains("HTTP 500")));
}

#[tokio::test]
async fn test_unreachable_sitemap_leaves_state_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let site = sitemap_site("down", &server);

    let progress = BatchProgress {
        next_offset: 20,
        total_urls: 40,
        last_run: chrono::Utc::now(),
    };
    crawler.store().save_progress("down", &progress).await.unwrap();
    let before = store.get(&keys::batch_progress("down")).await.unwrap();

    let result = crawler.perform_batch(&site, BatchOptions::default()).await;

    assert_eq!(result.skip_reason, Some(SkipReason::ResolutionFailed));
    assert_eq!(result.state, CrawlState::Idle);
    assert!(!result.errors.is_empty());
    assert!(store.get(&keys::full_scan("down")).await.unwrap().is_none());
    assert!(store.get(&keys::sitemap_state("down")).await.unwrap().is_none());
    assert_eq!(store.get(&keys::batch_progress("down")).await.unwrap(), before);
}

#[tokio::test]
async fn test_failed_new_listener_urls_are_retried() {
    let server = MockServer::start().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 101, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let site = sitemap_site("big", &server);

    let first = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert_eq!(first.skip_reason, Some(SkipReason::ListenerSnapshotCreated));

    server.reset().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 102, "2026-01-01")).await;
    Mock::given(method("GET"))
        .and(path("/page-101"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_pages(&server, &html("Page", "Body")).await;

    let second = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert!(second.listener_mode);
    assert_eq!(second.processed_in_batch, 1);
    assert_eq!(second.failed_backups, 1);
    assert!(second.changed_urls.is_empty());

    let raw = store.get(&keys::sitemap_snapshot("big")).await.unwrap().unwrap();
    let snapshot: ListenerSnapshot = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot.urls.len(), 101);
    assert!(!snapshot.urls.contains(&page_url(&server, 101)));

    // Same sitemap, same day: the failed URL is fetched again.
    server.reset().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 102, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let third = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert_eq!(third.skip_reason, None);
    assert_eq!(third.changed_urls, vec![page_url(&server, 101)]);
    assert_eq!(third.failed_backups, 0);

    server.reset().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 103, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let fourth = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert_eq!(fourth.total_urls, 1);
    assert_eq!(fourth.changed_urls, vec![page_url(&server, 102)]);
    assert_eq!(page_requests(&server).await, 1);
}

#[tokio::test]
async fn test_listener_snapshot_drops_removed_urls() {
    let server = MockServer::start().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 101, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let site = sitemap_site("big", &server);
    crawler.perform_batch(&site, BatchOptions::default()).await;

    server.reset().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 90, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let second = crawler.perform_batch(&site, BatchOptions::default()).await;
    assert!(second.listener_mode);
    assert_eq!(second.total_urls, 0);
    assert_eq!(second.state, CrawlState::CycleComplete);

    let raw = store.get(&keys::sitemap_snapshot("big")).await.unwrap().unwrap();
    let snapshot: ListenerSnapshot = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot.urls.len(), 90);
}

#[tokio::test]
async fn test_aborted_cycle_start_keeps_sitemap_unresolved() {
    let server = MockServer::start().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 3, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let store = Arc::new(MemoryStore::with_write_failures("url_set"));
    let crawler = crawler(store.clone());
    let site = sitemap_site("docs", &server);

    let result = crawler.perform_batch(&site, BatchOptions::default()).await;

    assert_eq!(result.processed_in_batch, 0);
    assert!(!result.errors.is_empty());
    assert!(store.get(&keys::sitemap_state("docs")).await.unwrap().is_none());
    assert_eq!(page_requests(&server).await, 0);
}

#[tokio::test]
async fn test_excluded_and_locale_urls_are_skipped() {
    let server = MockServer::start().await;
    mount_pages(&server, &html("Page", "Body")).await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let mut site = list_site(
        "filtered",
        vec![
            page_url(&server, 1),
            format!("{}/en/page-2", server.uri()),
            page_url(&server, 3),
        ],
    );
    site.exclude_patterns = vec![r"page-3$".to_string(), "(".to_string()];

    let result = crawler.perform_batch(&site, BatchOptions::default()).await;

    assert_eq!(result.total_urls, 1);
    assert_eq!(result.changed_urls, vec![page_url(&server, 1)]);
    assert!(result.warnings.iter().any(|w| w.contains("invalid exclude pattern")));
}

#[tokio::test]
async fn test_invocation_dispatch() {
    let server = MockServer::start().await;
    mount_xml(&server, "/sitemap.xml", urlset(&server, 2, "2026-01-01")).await;
    mount_pages(&server, &html("Page", "Body")).await;

    let store = Arc::new(MemoryStore::new());
    let crawler = crawler(store.clone());
    let config = Config {
        crawler: crawler_config(),
        sites: vec![sitemap_site("docs", &server)],
    };

    let request: InvocationRequest =
        serde_json::from_value(json!({ "siteId": "docs", "batchSize": 1 })).unwrap();
    let response = handle_invocation(&crawler, &config, request).await.unwrap();
    assert_eq!(response["totalUrls"], 2);
    assert_eq!(response["processedInBatch"], 1);
    assert_eq!(response["hasMore"], true);
    assert_eq!(response["state"], "scanning");

    let reset: InvocationRequest =
        serde_json::from_value(json!({ "siteId": "docs", "action": "reset" })).unwrap();
    let response = handle_invocation(&crawler, &config, reset).await.unwrap();
    assert_eq!(response["reset"], true);
    assert!(store.get(&keys::batch_progress("docs")).await.unwrap().is_none());

    let unknown: InvocationRequest =
        serde_json::from_value(json!({ "siteId": "nope" })).unwrap();
    assert!(handle_invocation(&crawler, &config, unknown).await.is_err());
}
