//! Storage key naming.

use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};

/// First 16 hex characters of the SHA-256 of a URL.
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// `YYYY-MM-DD` in UTC.
pub fn date_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Today's `YYYY-MM-DD` in UTC.
pub fn today() -> String {
    date_key(Utc::now())
}

/// Parse a `YYYY-MM-DD` key segment.
pub fn parse_date(segment: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(segment, "%Y-%m-%d").ok()
}

pub fn backup(site: &str, date: &str, url_hash: &str) -> String {
    format!("backup:{site}:{date}:{url_hash}")
}

pub fn meta(site: &str, date: &str, url_hash: &str) -> String {
    format!("meta:{site}:{date}:{url_hash}")
}

pub fn latest(site: &str, url_hash: &str) -> String {
    format!("latest:{site}:{url_hash}")
}

pub fn prev_latest(site: &str, url_hash: &str) -> String {
    format!("prev_latest:{site}:{url_hash}")
}

pub fn batch_progress(site: &str) -> String {
    format!("batch_progress:{site}")
}

pub fn sitemap_state(site: &str) -> String {
    format!("sitemap_state:{site}")
}

pub fn full_scan(site: &str) -> String {
    format!("full_scan:{site}")
}

pub fn sitemap_listener(site: &str) -> String {
    format!("sitemap_listener:{site}")
}

pub fn sitemap_snapshot(site: &str) -> String {
    format!("sitemap_snapshot:{site}")
}

pub fn url_set_meta(site: &str) -> String {
    format!("url_set_meta:{site}")
}

pub fn url_set_chunk(site: &str, chunk: usize) -> String {
    format!("url_set:{site}:{chunk}")
}

pub fn diff(site: &str, date: &str, url: &str) -> String {
    format!("diff:{site}:{date}:{}", url_hash(url))
}

/// Prefix of all dated backups of a site.
pub fn backup_prefix(site: &str) -> String {
    format!("backup:{site}:")
}

/// Prefix of all dated metadata of a site.
pub fn meta_prefix(site: &str) -> String {
    format!("meta:{site}:")
}

/// Date segment of a `backup:`/`meta:`/`diff:` key.
pub fn dated_key_date(key: &str) -> Option<NaiveDate> {
    key.split(':').nth(2).and_then(parse_date)
}
