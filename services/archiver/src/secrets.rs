use async_trait::async_trait;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("failed to read secret {secret_id}: {message}")]
    Fetch { secret_id: String, message: String },

    #[error("secret {0} has no string value")]
    Empty(String),

    #[error("failed to parse secret JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of secret string values
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretsStore: Send + Sync {
    async fn get_secret(&self, secret_id: &str) -> Result<String, SecretsError>;
}

/// [`SecretsStore`] backed by AWS Secrets Manager
pub struct SecretsManagerStore {
    client: SecretsClient,
}

impl SecretsManagerStore {
    pub fn new(sdk_config: &aws_types::SdkConfig) -> Self {
        Self {
            client: SecretsClient::new(sdk_config),
        }
    }
}

#[async_trait]
impl SecretsStore for SecretsManagerStore {
    #[instrument(skip(self))]
    async fn get_secret(&self, secret_id: &str) -> Result<String, SecretsError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| SecretsError::Fetch {
                secret_id: secret_id.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!("Secret retrieved");

        response
            .secret_string()
            .map(String::from)
            .ok_or_else(|| SecretsError::Empty(secret_id.to_string()))
    }
}

/// Static access keys for the mirror backend
#[derive(Clone, Deserialize)]
pub struct ReplicaCredentials {
    #[serde(rename = "ACCESS_KEY_ID")]
    pub access_key_id: String,
    #[serde(rename = "SECRET_ACCESS_KEY")]
    pub secret_access_key: String,
}

impl ReplicaCredentials {
    /// Parse the `{"ACCESS_KEY_ID": ..., "SECRET_ACCESS_KEY": ...}` secret document
    pub fn from_json(document: &str) -> Result<Self, SecretsError> {
        Ok(serde_json::from_str(document)?)
    }
}

impl fmt::Debug for ReplicaCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[redacted]")
            .finish()
    }
}
