// src/lambda/mod.rs

//! AWS Lambda handler for scheduled runs.
//!
//! Each invocation:
//! 1. Builds S3-backed storage from the environment
//! 2. Loads `config.toml` out of the bucket
//! 3. Dispatches the request (crawl / reset / diff) to the engine

use std::sync::Arc;
use std::time::Instant;

use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::config::{DEFAULT_CONFIG_KEY, StoreConfigLoader};
use crate::error::Result;
use crate::pipeline::{BatchCrawler, InvocationRequest, handle_invocation};
use crate::storage::{KvStore, S3Storage};

/// Lambda response payload.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Main Lambda handler function.
#[instrument(skip(event))]
pub async fn handler(
    event: LambdaEvent<InvocationRequest>,
) -> std::result::Result<InvocationResponse, LambdaError> {
    let start = Instant::now();
    let (request, _context) = event.into_parts();

    info!(
        "Starting {:?} for site {}",
        request.action, request.site_id
    );

    let response = match run(request).await {
        Ok(result) => InvocationResponse {
            success: true,
            result: Some(result),
            ..Default::default()
        },
        Err(e) => {
            error!("Invocation failed: {}", e);
            InvocationResponse {
                error: Some(e.to_string()),
                ..Default::default()
            }
        }
    };

    Ok(InvocationResponse {
        execution_time_ms: start.elapsed().as_millis() as u64,
        ..response
    })
}

async fn run(request: InvocationRequest) -> Result<Value> {
    let store: Arc<dyn KvStore> = Arc::new(S3Storage::from_env().await?);

    let config_key =
        std::env::var("SITEWATCH_CONFIG_KEY").unwrap_or_else(|_| DEFAULT_CONFIG_KEY.to_string());
    let config = StoreConfigLoader::new(store.clone(), config_key)
        .load_config()
        .await?;

    let crawler = BatchCrawler::new(store, config.crawler.clone())?;
    handle_invocation(&crawler, &config, request).await
}
