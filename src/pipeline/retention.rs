// src/pipeline/retention.rs

//! Retention cleanup for dated backups.
//!
//! Deletes `backup:` and `meta:` keys older than a site's retention window.
//! `latest`/`prev_latest` pointers and batch state are never touched.

use chrono::{Days, NaiveDate};
use log::{debug, info};

use crate::error::Result;
use crate::storage::{KvStore, ListOptions, keys};

/// Deletes issued per invocation, to stay inside the call budget.
pub const MAX_DELETES_PER_RUN: usize = 200;

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub scanned: usize,
    pub deleted: usize,
    /// Stopped at the delete cap with expired keys left
    pub capped: bool,
}

/// Delete dated keys of `site_id` older than `retention_days` before `today`.
pub async fn cleanup(
    kv: &dyn KvStore,
    site_id: &str,
    retention_days: u32,
    today: NaiveDate,
) -> Result<RetentionReport> {
    let mut report = RetentionReport::default();
    let Some(cutoff) = today.checked_sub_days(Days::new(u64::from(retention_days))) else {
        return Ok(report);
    };

    for prefix in [keys::backup_prefix(site_id), keys::meta_prefix(site_id)] {
        let mut cursor = None;
        loop {
            let page = kv
                .list(ListOptions {
                    prefix: prefix.clone(),
                    cursor,
                    limit: None,
                })
                .await?;

            for key in &page.keys {
                report.scanned += 1;
                let Some(date) = keys::dated_key_date(key) else {
                    continue;
                };
                if date >= cutoff {
                    continue;
                }
                if report.deleted >= MAX_DELETES_PER_RUN {
                    report.capped = true;
                    info!(
                        "Retention for {} hit the delete cap ({}), resuming next cycle",
                        site_id, MAX_DELETES_PER_RUN
                    );
                    return Ok(report);
                }
                debug!("Deleting expired {}", key);
                kv.delete(key).await?;
                report.deleted += 1;
            }

            if page.complete {
                break;
            }
            cursor = page.cursor;
        }
    }

    if report.deleted > 0 {
        info!(
            "Retention for {} removed {} key(s) older than {}",
            site_id, report.deleted, cutoff
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, PutOptions};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_cleanup_deletes_only_expired_dated_keys() {
        let store = MemoryStore::new();
        for key in [
            "backup:docs:2026-01-01:a",
            "meta:docs:2026-01-01:a",
            "backup:docs:2026-01-25:a",
            "backup:blog:2026-01-01:a",
            "latest:docs:a",
        ] {
            store.put(key, "x", PutOptions::default()).await.unwrap();
        }

        let report = cleanup(&store, "docs", 10, day(2026, 1, 30)).await.unwrap();
        assert_eq!(report.deleted, 2);
        assert!(!report.capped);
        assert_eq!(
            store.keys_with_prefix("").await,
            vec![
                "backup:blog:2026-01-01:a",
                "backup:docs:2026-01-25:a",
                "latest:docs:a",
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_respects_delete_cap() {
        let store = MemoryStore::new();
        for i in 0..(MAX_DELETES_PER_RUN + 5) {
            store
                .put(&format!("backup:docs:2025-01-01:{i:04}"), "x", PutOptions::default())
                .await
                .unwrap();
        }

        let report = cleanup(&store, "docs", 30, day(2026, 1, 30)).await.unwrap();
        assert_eq!(report.deleted, MAX_DELETES_PER_RUN);
        assert!(report.capped);
        assert_eq!(store.len().await, 5);
    }
}
