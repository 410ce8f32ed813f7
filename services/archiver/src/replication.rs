//! Best-effort mirroring into a secondary backend.
//!
//! The mirror client is built on first use from credentials held in a secrets
//! store, then reused for the lifetime of the sink. Concurrent first callers
//! wait on a single initialization.

use crate::config::ReplicaConfig;
use crate::secrets::{ReplicaCredentials, SecretsError, SecretsStore};
use crate::storage::{ObjectLocator, ObjectStorage, S3ObjectStorage, StorageError};
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("failed to connect to replica backend: {0}")]
    Connect(#[from] SecretsError),

    #[error("writing to replica failed: {0}")]
    Write(#[source] StorageError),
}

/// Builds a client for the secondary backend
#[async_trait]
pub trait ReplicaConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ObjectStorage>, ReplicationError>;
}

/// Connects with static credentials read from a [`SecretsStore`]
pub struct SecretsBackedConnector {
    secrets: Arc<dyn SecretsStore>,
    config: ReplicaConfig,
}

impl SecretsBackedConnector {
    pub fn new(secrets: Arc<dyn SecretsStore>, config: ReplicaConfig) -> Self {
        Self { secrets, config }
    }

    fn build_client(&self, credentials: ReplicaCredentials) -> S3Client {
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.config.region.clone()))
            .endpoint_url(self.config.endpoint())
            .force_path_style(true)
            .credentials_provider(Credentials::new(
                credentials.access_key_id,
                credentials.secret_access_key,
                None,
                None,
                "replica-secret",
            ))
            .build();

        S3Client::from_conf(s3_config)
    }
}

#[async_trait]
impl ReplicaConnector for SecretsBackedConnector {
    #[instrument(skip(self), fields(secret_id = %self.config.secret_id))]
    async fn connect(&self) -> Result<Arc<dyn ObjectStorage>, ReplicationError> {
        let document = self.secrets.get_secret(&self.config.secret_id).await?;
        let credentials = ReplicaCredentials::from_json(&document)?;
        let client = self.build_client(credentials);

        info!(
            endpoint = %self.config.endpoint(),
            region = %self.config.region,
            "Replica client initialized"
        );

        // Only put_object is used against the mirror, the waiter ceiling is moot
        Ok(Arc::new(S3ObjectStorage::from_client(
            client,
            Duration::from_secs(60),
        )))
    }
}

/// Writes payloads into the mirror bucket
pub struct ReplicationSink {
    connector: Arc<dyn ReplicaConnector>,
    bucket: String,
    client: OnceCell<Arc<dyn ObjectStorage>>,
}

impl ReplicationSink {
    pub fn new(connector: Arc<dyn ReplicaConnector>, bucket: impl Into<String>) -> Self {
        Self {
            connector,
            bucket: bucket.into(),
            client: OnceCell::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store `body` under `key` in the mirror bucket
    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    pub async fn store(
        &self,
        body: Bytes,
        key: &str,
        content_type: &str,
    ) -> Result<(), ReplicationError> {
        let client = self.client().await?;
        let locator = ObjectLocator::new(self.bucket.as_str(), key);

        client
            .put_object(&locator, body, content_type)
            .await
            .map_err(ReplicationError::Write)?;

        info!(locator = %locator, "Copied to replica");
        Ok(())
    }

    /// The mirror client, connecting on first use.
    ///
    /// A failed connection leaves the cell empty so the next caller retries.
    async fn client(&self) -> Result<&Arc<dyn ObjectStorage>, ReplicationError> {
        self.client
            .get_or_try_init(|| async {
                info!("Connecting to replica backend");
                self.connector.connect().await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MockSecretsStore;
    use crate::storage::testing::MemoryStorage;
    use crate::storage::Operation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnector {
        storage: Arc<MemoryStorage>,
        connects: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl CountingConnector {
        fn new(storage: Arc<MemoryStorage>, failures: usize) -> Self {
            Self {
                storage,
                connects: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl ReplicaConnector for CountingConnector {
        async fn connect(&self) -> Result<Arc<dyn ObjectStorage>, ReplicationError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;

            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ReplicationError::Connect(SecretsError::Empty(
                    "wasabi-credentials".to_string(),
                )));
            }
            let storage: Arc<dyn ObjectStorage> = self.storage.clone();
            Ok(storage)
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_use_connects_once() {
        let storage = Arc::new(MemoryStorage::new());
        let connector = Arc::new(CountingConnector::new(storage.clone(), 0));
        let sink = Arc::new(ReplicationSink::new(connector.clone(), "mirror"));

        let writes = (0..8).map(|i| {
            let sink = sink.clone();
            tokio::spawn(async move {
                sink.store(Bytes::from_static(b"jpeg"), &format!("photos/{i}.jpg"), "image/jpeg")
                    .await
            })
        });

        for result in futures::future::join_all(writes).await {
            result.unwrap().unwrap();
        }

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        for i in 0..8 {
            assert!(storage.contains(&ObjectLocator::new("mirror", format!("photos/{i}.jpg"))));
        }
    }

    #[tokio::test]
    async fn test_failed_connect_is_retried() {
        let storage = Arc::new(MemoryStorage::new());
        let connector = Arc::new(CountingConnector::new(storage.clone(), 1));
        let sink = ReplicationSink::new(connector.clone(), "mirror");

        let err = sink
            .store(Bytes::from_static(b"jpeg"), "photos/a.jpg", "image/jpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Connect(_)));

        sink.store(Bytes::from_static(b"jpeg"), "photos/a.jpg", "image/jpeg")
            .await
            .unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_distinguishable() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_on(Operation::Put, "photos/a.jpg");
        let sink = ReplicationSink::new(Arc::new(CountingConnector::new(storage, 0)), "mirror");

        let err = sink
            .store(Bytes::from_static(b"jpeg"), "photos/a.jpg", "image/jpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Write(_)));
    }

    #[tokio::test]
    async fn test_secrets_backed_connector() {
        let mut secrets = MockSecretsStore::new();
        secrets.expect_get_secret().times(1).returning(|_| {
            Ok(r#"{"ACCESS_KEY_ID": "AKIAEXAMPLE", "SECRET_ACCESS_KEY": "s3cr3t"}"#.to_string())
        });

        let connector = SecretsBackedConnector::new(Arc::new(secrets), ReplicaConfig::default());
        assert!(connector.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_secrets_backed_connector_bad_secret() {
        let mut secrets = MockSecretsStore::new();
        secrets
            .expect_get_secret()
            .times(1)
            .returning(|_| Ok("not json".to_string()));

        let connector = SecretsBackedConnector::new(Arc::new(secrets), ReplicaConfig::default());
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, ReplicationError::Connect(SecretsError::Parse(_))));
    }
}
