//! Service layer for the crawl engine.
//!
//! This module contains the building blocks the batch pipeline composes:
//! - Page fetching with retries and manual redirects (`PageFetcher`)
//! - Sitemap tree resolution (`SitemapResolver`)
//! - Noise-tolerant normalization and hashing (`ContentNormalizer`)
//! - Change detection against stored state (`ChangeDetector`)

pub mod change;
pub mod fetcher;
pub mod normalizer;
pub mod sitemap;

pub use change::{ChangeDetector, ChangeVerdict};
pub use fetcher::{ConditionalFetch, FetchedPage, PageFetcher, Validators};
pub use normalizer::{ContentNormalizer, NormalizedContent, detect_content_type, sha256_hex};
pub use sitemap::{SitemapCheck, SitemapDocument, SitemapResolution, SitemapResolver};
