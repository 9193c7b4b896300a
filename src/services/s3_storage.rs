//! [`ObjectStore`] backed by Amazon S3 (or any S3-compatible endpoint).
//!
//! Credentials, region and endpoint come from the standard AWS environment
//! (`AWS_REGION`, `AWS_ENDPOINT_URL`, profiles, instance roles, ...).

use crate::models::object::{DerivedArtifact, OriginalObject};
use crate::services::storage_service::{ObjectStore, StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client, error::DisplayErrorContext, primitives::ByteStream, types::StorageClass,
};
use tracing::debug;

#[derive(Clone)]
pub struct S3StorageService {
    client: Client,
}

impl S3StorageService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient AWS configuration.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }
}

fn backend_error<E: std::error::Error>(err: E) -> StorageError {
    StorageError::Backend(DisplayErrorContext(&err).to_string())
}

#[async_trait]
impl ObjectStore for S3StorageService {
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<OriginalObject> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StorageError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    backend_error(err)
                }
            })?;

        let content_type = output.content_type().map(str::to_owned);
        let body = output
            .body
            .collect()
            .await
            .map_err(backend_error)?
            .into_bytes();

        debug!(bucket = %bucket, key = %key, size = body.len(), "fetched object from S3");
        Ok(OriginalObject { content_type, body })
    }

    async fn put_object(&self, bucket: &str, artifact: &DerivedArtifact) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(&artifact.key)
            .body(ByteStream::from(artifact.body.clone()))
            .content_type(&artifact.content_type)
            .cache_control(&artifact.cache_control)
            .storage_class(StorageClass::from(artifact.storage_class.as_str()))
            .send()
            .await
            .map_err(backend_error)?;

        debug!(bucket = %bucket, key = %artifact.key, "stored object in S3");
        Ok(())
    }

    async fn check_ready(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}
