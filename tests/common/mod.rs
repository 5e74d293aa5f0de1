//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use sitewatch::models::{CrawlerConfig, FetchOptions, SiteConfig};
use sitewatch::pipeline::BatchCrawler;
use sitewatch::storage::{KvStore, MemoryStore};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn crawler_config() -> CrawlerConfig {
    CrawlerConfig {
        sitemap_timeout_ms: 5_000,
        ..CrawlerConfig::default()
    }
}

pub fn crawler(store: Arc<MemoryStore>) -> BatchCrawler {
    let kv: Arc<dyn KvStore> = store;
    BatchCrawler::new(kv, crawler_config()).unwrap()
}

/// Fast-failing fetch options for tests.
pub fn fetch_options() -> FetchOptions {
    FetchOptions {
        timeout_ms: 5_000,
        retries: 0,
        retry_delay_ms: 10,
        concurrency: 4,
    }
}

pub fn sitemap_site(id: &str, server: &MockServer) -> SiteConfig {
    SiteConfig {
        fetch: fetch_options(),
        ..SiteConfig::with_sitemap(id, format!("{}/sitemap.xml", server.uri()))
    }
}

pub fn list_site(id: &str, urls: Vec<String>) -> SiteConfig {
    SiteConfig {
        fetch: fetch_options(),
        ..SiteConfig::with_urls(id, urls)
    }
}

pub fn page_url(server: &MockServer, i: usize) -> String {
    format!("{}/page-{}", server.uri(), i)
}

/// `<urlset>` listing `count` pages, each stamped with `lastmod`.
pub fn urlset(server: &MockServer, count: usize, lastmod: &str) -> String {
    let entries: String = (0..count)
        .map(|i| {
            format!(
                "<url><loc>{}</loc><lastmod>{}</lastmod></url>",
                page_url(server, i),
                lastmod
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#
    )
}

/// `<sitemapindex>` pointing at `children` (absolute URLs).
pub fn sitemap_index(children: &[String]) -> String {
    let entries: String = children
        .iter()
        .map(|c| format!("<sitemap><loc>{c}</loc></sitemap>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</sitemapindex>"#
    )
}

pub async fn mount_xml(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "application/xml"),
        )
        .mount(server)
        .await;
}

/// Serve every `/page-N` with the same HTML body.
pub async fn mount_pages(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/page-\d+$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

pub fn html(title: &str, body: &str) -> String {
    format!("<html><head><title>{title}</title></head><body><main><p>{body}</p></main></body></html>")
}

/// Requests the server has seen for `/page-N` paths.
pub async fn page_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().starts_with("/page-"))
        .count()
}
