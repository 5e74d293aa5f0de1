//! AWS S3 storage implementation.
//!
//! Every key maps to the object `{prefix}/{key}`. S3 has no per-object TTL,
//! so values are wrapped in an expiry envelope that is checked on read;
//! expired objects still appear in listings until retention removes them.
//! Objects written by other tools (e.g. an uploaded `config.toml`) are not
//! enveloped and are returned verbatim.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use log::{debug, info};

use crate::error::{AppError, Result};
use crate::storage::{DEFAULT_LIST_LIMIT, Envelope, KvStore, ListOptions, ListPage, PutOptions};

/// S3-backed key-value store.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    /// Create a new S3 storage instance.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// Create S3 storage from environment configuration.
    pub async fn from_env() -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "sitewatch".to_string());
        let prefix = std::env::var("S3_PREFIX").unwrap_or_else(|_| "sitewatch".to_string());

        info!("Using s3://{}/{}", bucket, prefix);
        Ok(Self::new(client, bucket, prefix))
    }

    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    fn strip_prefix<'a>(&self, object_key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            object_key
        } else {
            object_key
                .strip_prefix(&self.prefix)
                .and_then(|k| k.strip_prefix('/'))
                .unwrap_or(object_key)
        }
    }

    /// Read raw object bytes, `None` if the object does not exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output.body.collect().await.map_err(AppError::store)?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    debug!("No object at s3://{}/{}", self.bucket, key);
                    Ok(None)
                } else {
                    Err(AppError::store(service_err))
                }
            }
        }
    }
}

#[async_trait]
impl KvStore for S3Storage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(bytes) = self.read_bytes(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Envelope>(&bytes) {
            Ok(envelope) => Ok(envelope.into_live()),
            Err(_) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| AppError::store(format!("object {key} is not UTF-8: {e}"))),
        }
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()> {
        let bytes = serde_json::to_vec(&Envelope::new(value, options))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .body(ByteStream::from(bytes))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| AppError::store(e.into_service_error()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| AppError::store(e.into_service_error()))?;
        Ok(())
    }

    async fn list(&self, options: ListOptions) -> Result<ListPage> {
        let limit = options.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 1000);
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.object_key(&options.prefix))
            .set_continuation_token(options.cursor)
            .max_keys(limit as i32)
            .send()
            .await
            .map_err(|e| AppError::store(e.into_service_error()))?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .map(|k| self.strip_prefix(k).to_string())
            .collect();
        let cursor = output.next_continuation_token().map(str::to_string);
        let complete = !output.is_truncated().unwrap_or(false) || cursor.is_none();

        Ok(ListPage {
            keys,
            cursor,
            complete,
        })
    }
}
