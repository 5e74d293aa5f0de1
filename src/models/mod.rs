// src/models/mod.rs

//! Domain models for the crawl engine.
//!
//! This module contains all data structures used throughout the engine,
//! organized by their primary purpose.

mod backup;
mod batch;
mod config;
mod diff;
mod sitemap;

// Re-export all public types
pub use backup::{BackupMetadata, ContentType};
pub use batch::{
    BatchOptions, BatchProgress, BatchProgressReport, BatchedResult, CrawlState, FailureStage,
    SkipReason, UrlOutcome,
};
pub use config::{ChangeThreshold, Config, CrawlerConfig, FetchOptions, SiteConfig};
pub use diff::{
    Change, ChangeKind, DetailedDiff, DiffCacheEntry, DiffMetadata, DiffOptions, DiffSummary,
    TruncationSplit,
};
pub use sitemap::{FullScanState, ListenerSnapshot, ListenerState, SitemapState, UrlSetManifest};
