use crate::config::AwsConfig;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::client::Waiters;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// A bucket + key pair naming one object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocator {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Body and reported content type of a fetched object
#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Backend operation, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Copy,
    WaitExists,
    Delete,
    Put,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Get => "GetObject",
            Operation::Copy => "CopyObject",
            Operation::WaitExists => "WaitUntilObjectExists",
            Operation::Delete => "DeleteObject",
            Operation::Put => "PutObject",
        };
        f.write_str(name)
    }
}

/// Errors returned by an object storage backend
#[derive(Error, Debug)]
#[error("{operation} on {locator} failed: {message}")]
pub struct StorageError {
    pub operation: Operation,
    pub locator: ObjectLocator,
    pub message: String,
}

impl StorageError {
    pub fn new(operation: Operation, locator: &ObjectLocator, message: impl Into<String>) -> Self {
        Self {
            operation,
            locator: locator.clone(),
            message: message.into(),
        }
    }
}

/// The storage operations the archiver depends on
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn get_object(&self, locator: &ObjectLocator) -> Result<FetchedObject, StorageError>;

    async fn copy_object(
        &self,
        source: &ObjectLocator,
        destination: &ObjectLocator,
        storage_class: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Block until the object is visible, using the backend's own retry policy
    async fn wait_until_exists(&self, locator: &ObjectLocator) -> Result<(), StorageError>;

    async fn delete_object(&self, locator: &ObjectLocator) -> Result<(), StorageError>;

    async fn put_object(
        &self,
        locator: &ObjectLocator,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;
}

/// [`ObjectStorage`] backed by an S3-compatible service
pub struct S3ObjectStorage {
    client: S3Client,
    confirm_timeout: Duration,
}

impl S3ObjectStorage {
    /// Create a client for the primary backend from ambient AWS credentials
    pub async fn new(config: &AwsConfig, confirm_timeout: Duration) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(region = %config.region, "S3 storage initialized");

        Ok(Self::from_client(client, confirm_timeout))
    }

    pub fn from_client(client: S3Client, confirm_timeout: Duration) -> Self {
        Self {
            client,
            confirm_timeout,
        }
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    #[instrument(skip(self), fields(locator = %locator))]
    async fn get_object(&self, locator: &ObjectLocator) -> Result<FetchedObject, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&locator.bucket)
            .key(&locator.key)
            .send()
            .await
            .map_err(|e| {
                StorageError::new(Operation::Get, locator, DisplayErrorContext(&e).to_string())
            })?;

        let content_type = response.content_type().map(String::from);
        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::new(Operation::Get, locator, e.to_string()))?
            .into_bytes();

        debug!(size_bytes = body.len(), content_type = ?content_type, "Fetched object");

        Ok(FetchedObject { content_type, body })
    }

    #[instrument(skip(self), fields(source = %source, destination = %destination))]
    async fn copy_object(
        &self,
        source: &ObjectLocator,
        destination: &ObjectLocator,
        storage_class: Option<&str>,
    ) -> Result<(), StorageError> {
        self.client
            .copy_object()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .copy_source(copy_source(source))
            .set_storage_class(storage_class.map(StorageClass::from))
            .send()
            .await
            .map_err(|e| {
                StorageError::new(
                    Operation::Copy,
                    destination,
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        Ok(())
    }

    #[instrument(skip(self), fields(locator = %locator))]
    async fn wait_until_exists(&self, locator: &ObjectLocator) -> Result<(), StorageError> {
        self.client
            .wait_until_object_exists()
            .bucket(&locator.bucket)
            .key(&locator.key)
            .wait(self.confirm_timeout)
            .await
            .map_err(|e| {
                StorageError::new(
                    Operation::WaitExists,
                    locator,
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        Ok(())
    }

    #[instrument(skip(self), fields(locator = %locator))]
    async fn delete_object(&self, locator: &ObjectLocator) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&locator.bucket)
            .key(&locator.key)
            .send()
            .await
            .map_err(|e| {
                StorageError::new(Operation::Delete, locator, DisplayErrorContext(&e).to_string())
            })?;

        Ok(())
    }

    #[instrument(skip(self, body), fields(locator = %locator, size_bytes = body.len()))]
    async fn put_object(
        &self,
        locator: &ObjectLocator,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let content_length = body.len() as i64;
        let response = self
            .client
            .put_object()
            .bucket(&locator.bucket)
            .key(&locator.key)
            .content_type(content_type)
            .content_length(content_length)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                StorageError::new(Operation::Put, locator, DisplayErrorContext(&e).to_string())
            })?;

        debug!(e_tag = response.e_tag().unwrap_or_default(), "Object written");
        Ok(())
    }
}

/// `bucket/key` with every key segment URL-encoded
fn copy_source(source: &ObjectLocator) -> String {
    let key = source
        .key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", source.bucket, key)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_source_encodes_segments() {
        let source = ObjectLocator::new("photos-bucket", "import/my trip/IMG 1.jpg");
        assert_eq!(copy_source(&source), "photos-bucket/import/my%20trip/IMG%201.jpg");
    }

    #[test]
    fn test_locator_display() {
        let locator = ObjectLocator::new("bucket", "import/a.jpg");
        assert_eq!(locator.to_string(), "bucket/import/a.jpg");
    }

    #[test]
    fn test_storage_error_names_operation() {
        let err = StorageError::new(
            Operation::WaitExists,
            &ObjectLocator::new("b", "k"),
            "timed out",
        );
        assert_eq!(err.to_string(), "WaitUntilObjectExists on b/k failed: timed out");
    }
}
