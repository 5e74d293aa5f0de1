//! AWS Lambda entry point for sitewatch
//!
//! Deploy with `cargo lambda build --release --features lambda`.
//! The scheduler invokes it once per site per tick with an `InvocationRequest`.

use lambda_runtime::{Error as LambdaError, service_fn};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sitewatch::lambda::handler;

/// Main entry point for the AWS Lambda function.
#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("sitewatch lambda starting...");
    lambda_runtime::run(service_fn(handler)).await
}
