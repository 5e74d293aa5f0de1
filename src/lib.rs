// src/lib.rs

//! sitewatch: batched website crawling with noise-tolerant change detection.
//!
//! The engine resolves a site's URL set (sitemap tree or explicit list),
//! fetches it in resumable batches sized to an external call budget, stores
//! dated snapshots in an abstract key-value store and reports which pages
//! changed after normalization. Stored versions can be compared with a
//! categorized diff.

pub mod config;
pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
