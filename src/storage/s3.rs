//! S3 blob store.

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::config::Config;
use crate::error::{Result, ServiceError};

use super::backend::ObjectStore;

/// `ObjectStore` implementation over an S3 bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
}

// Timeouts and dispatch failures never reached the service, so a retry is
// plausible; anything the service rejected is a hard failure.
fn storage_error<E, R>(err: &SdkError<E, R>, msg: String) -> ServiceError {
    let inner = ServiceError::Storage(msg);
    if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
        ServiceError::Transient(Box::new(inner))
    } else {
        inner
    }
}

impl S3Store {
    pub fn new(client: Client, cfg: &Config) -> Result<Self> {
        if cfg.aws_region.is_empty() || cfg.s3_bucket.is_empty() {
            return Err(ServiceError::Input(
                "DSDE_AWS_REGION and DSDE_S3_BUCKET must be set".into(),
            ));
        }
        Ok(Self {
            client,
            bucket: cfg.s3_bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| storage_error(&e, format!("S3 put {}: {}", key, e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("NoSuchKey") || msg.contains("404") {
                    // A missing blob behind an existing chunk record is a
                    // store inconsistency, not a missing file.
                    ServiceError::Storage(format!("object missing: {}", key))
                } else {
                    storage_error(&e, format!("S3 get {}: {}", key, msg))
                }
            })?;

        let data = out
            .body
            .collect()
            .await
            .map_err(|e| ServiceError::Storage(format!("S3 read {}: {}", key, e)))?;
        Ok(data.into_bytes())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let result = request
                .send()
                .await
                .map_err(|e| storage_error(&e, format!("S3 list: {}", e)))?;

            if let Some(contents) = result.contents {
                for obj in contents {
                    if let Some(key) = obj.key {
                        keys.push(key);
                    }
                }
            }

            if result.is_truncated.unwrap_or(false) {
                continuation_token = result.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(keys)
    }
}
