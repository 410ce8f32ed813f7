use crate::keys::KeyPolicy;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_SOURCE_PREFIX: &str = "import/";
pub const DEFAULT_DESTINATION_PREFIX: &str = "photos/";
pub const DEFAULT_THUMBNAIL_PREFIX: &str = "thumbs/";

/// Main configuration for the archiver service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// Primary storage backend configuration
    #[serde(default)]
    pub aws: AwsConfig,
    /// Relocation rules
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Thumbnail derivation
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
    /// Secondary backend mirror
    #[serde(default)]
    pub replica: ReplicaConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Build identifier echoed into per-record log lines
    #[serde(default)]
    pub build_stamp: Option<String>,
}

/// Kafka consumer configuration for bucket notifications
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic carrying S3 event notification documents
    #[serde(default = "default_notification_topic")]
    pub notification_topic: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,
}

/// Primary S3 backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// AWS region of the primary backend
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Where objects come from and where they go
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Only keys under this prefix are archived
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,
    /// Permanent location prefix
    #[serde(default = "default_destination_prefix")]
    pub destination_prefix: String,
    /// Destination bucket; the notification's bucket when unset
    pub destination_bucket: Option<String>,
    /// Region notifications must come from; `aws.region` when unset
    pub expected_region: Option<String>,
    /// Whether subfolders below the source prefix survive relocation
    #[serde(default)]
    pub key_policy: KeyPolicy,
    /// Storage class hint for the permanent copy (empty disables)
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
    /// Ceiling handed to the backend's object-exists waiter
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
}

/// Thumbnail derivation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Replaces the destination prefix in thumbnail keys
    #[serde(default = "default_thumbnail_prefix")]
    pub prefix: String,
    /// Length of the longer side of a thumbnail, in pixels
    #[serde(default = "default_long_edge")]
    pub long_edge: u32,
}

/// Secondary (mirror) backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Mirror bucket
    #[serde(default)]
    pub bucket: String,
    /// Mirror region
    #[serde(default = "default_replica_region")]
    pub region: String,
    /// Mirror endpoint; derived from the region when unset
    pub endpoint_url: Option<String>,
    /// Secrets Manager identifier holding the mirror credentials
    #[serde(default = "default_replica_secret_id")]
    pub secret_id: String,
}

// Default value functions
fn default_service_name() -> String {
    "photo-archiver".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_consumer_group() -> String {
    "photo-archiver".to_string()
}

fn default_notification_topic() -> String {
    "archiver.s3.notifications".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_region() -> String {
    "eu-west-2".to_string()
}

fn default_source_prefix() -> String {
    DEFAULT_SOURCE_PREFIX.to_string()
}

fn default_destination_prefix() -> String {
    DEFAULT_DESTINATION_PREFIX.to_string()
}

fn default_thumbnail_prefix() -> String {
    DEFAULT_THUMBNAIL_PREFIX.to_string()
}

fn default_storage_class() -> String {
    "STANDARD_IA".to_string()
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_long_edge() -> u32 {
    200
}

fn default_replica_region() -> String {
    "eu-central-1".to_string()
}

fn default_replica_secret_id() -> String {
    "wasabi-credentials".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "photo-archiver")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/archiver").required(false))
            .add_source(config::File::with_name("/etc/archiver/archiver").required(false))
            // Override with environment variables
            // ARCHIVER__ARCHIVE__SOURCE_PREFIX -> archive.source_prefix
            .add_source(
                config::Environment::with_prefix("ARCHIVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        Ok(config.normalized())
    }

    /// Coerce the configured prefixes into usable `dir/` form
    pub fn normalized(mut self) -> Self {
        self.archive.source_prefix =
            normalize_prefix(&self.archive.source_prefix, DEFAULT_SOURCE_PREFIX);
        self.archive.destination_prefix =
            normalize_prefix(&self.archive.destination_prefix, DEFAULT_DESTINATION_PREFIX);
        self.thumbnails.prefix = normalize_prefix(&self.thumbnails.prefix, DEFAULT_THUMBNAIL_PREFIX);
        self
    }

    /// Region notifications are expected to originate from
    pub fn expected_region(&self) -> &str {
        self.archive
            .expected_region
            .as_deref()
            .unwrap_or(&self.aws.region)
    }

    /// Get the confirm wait ceiling as Duration
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.archive.confirm_timeout_secs)
    }
}

impl ArchiveConfig {
    /// Storage class hint, `None` when disabled
    pub fn storage_class(&self) -> Option<&str> {
        Some(self.storage_class.as_str()).filter(|class| !class.is_empty())
    }
}

impl ReplicaConfig {
    /// Endpoint of the mirror backend
    pub fn endpoint(&self) -> String {
        self.endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.wasabisys.com", self.region))
    }
}

/// An empty prefix becomes `default`; anything else is given a trailing `/`.
pub fn normalize_prefix(prefix: &str, default: &str) -> String {
    if prefix.is_empty() {
        default.to_string()
    } else if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            build_stamp: None,
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            source_prefix: default_source_prefix(),
            destination_prefix: default_destination_prefix(),
            destination_bucket: None,
            expected_region: None,
            key_policy: KeyPolicy::default(),
            storage_class: default_storage_class(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            prefix: default_thumbnail_prefix(),
            long_edge: default_long_edge(),
        }
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bucket: String::new(),
            region: default_replica_region(),
            endpoint_url: None,
            secret_id: default_replica_secret_id(),
        }
    }
}
