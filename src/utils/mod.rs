//! Utility functions and helpers.

pub mod http;
pub mod report;
pub mod url;

pub use url::{normalize_url, resolve};
