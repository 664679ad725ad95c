use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::error::ProvideErrorMetadata;

use crate::error::{DeleteFailed, StoreError};

/// Storage that can delete objects by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}

pub struct S3ObjectStore {
    client: s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        match self.client.delete_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(()),
            // S3 normally answers 204 for absent keys, but some compatible stores do not
            Err(err) if matches!(err.code(), Some("NoSuchKey") | Some("NotFound")) => {
                Err(StoreError::NotFound(format!("s3://{}/{}", bucket, key)))
            }
            Err(err) => Err(StoreError::Backend(s3::Error::from(err).to_string())),
        }
    }
}

/// Removes flagged objects. Deleting an object that is already gone counts as
/// success.
pub struct ObjectRemediator {
    store: Arc<dyn ObjectStore>,
}

impl ObjectRemediator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), DeleteFailed> {
        match self.store.delete_object(bucket, key).await {
            Ok(()) => {
                tracing::info!(bucket, key, "Deleted flagged object");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                tracing::info!(bucket, key, "Flagged object already absent");
                Ok(())
            }
            Err(StoreError::Backend(reason)) => Err(DeleteFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason,
            }),
        }
    }
}
