//! Invocation dispatch shared by the Lambda handler and tests.

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::{BatchOptions, Config, DiffOptions};
use crate::pipeline::{BatchCrawler, DiffClassifier};

/// What a scheduler tick asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Crawl,
    Reset,
    Diff,
}

/// Invocation payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub site_id: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub batch_offset: Option<usize>,
    #[serde(default)]
    pub continue_from_last: bool,
    /// Page to diff (`diff` only)
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub max_changes: Option<usize>,
}

/// Run one request against the engine and return its JSON response.
///
/// Unknown sites and malformed diff requests are `Err`; crawl problems are
/// reported inside the returned `BatchedResult`.
pub async fn handle_invocation(
    crawler: &BatchCrawler,
    config: &Config,
    request: InvocationRequest,
) -> Result<Value> {
    let site = config
        .site(&request.site_id)
        .ok_or_else(|| AppError::validation(format!("unknown site '{}'", request.site_id)))?;
    info!("Invocation {:?} for {}", request.action, site.id);

    match request.action {
        Action::Crawl => {
            let options = BatchOptions {
                batch_size: request.batch_size,
                batch_offset: request.batch_offset,
                continue_from_last: request.continue_from_last,
            };
            let result = crawler.perform_batch(site, options).await;
            Ok(serde_json::to_value(result)?)
        }
        Action::Reset => {
            crawler.reset_progress(&site.id).await?;
            Ok(json!({ "siteId": site.id, "reset": true }))
        }
        Action::Diff => {
            let url = request
                .url
                .as_deref()
                .ok_or_else(|| AppError::validation("diff requires a url"))?;
            let options = DiffOptions {
                max_changes: request.max_changes,
                ..DiffOptions::default()
            };
            let classifier = DiffClassifier::new(crawler.store().clone());
            match classifier.diff_latest(&site.id, url, &options).await? {
                Some(diff) => Ok(serde_json::to_value(diff)?),
                None => Ok(json!({
                    "siteId": site.id,
                    "url": url,
                    "diff": null,
                    "reason": "fewer than two stored versions",
                })),
            }
        }
    }
}
