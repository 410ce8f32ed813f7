//! Photo Archiver Service
//!
//! Event-driven archiving for uploaded photos. The service consumes bucket
//! notifications from Kafka, reads the capture date out of each new image,
//! and moves it from the upload prefix into a date-partitioned archive tree.
//!
//! ## Features
//!
//! - **Content dating**: EXIF capture, creation and modification dates from
//!   JPEG, HEIC and Canon CR3 containers, falling back to the processing time
//! - **Safe relocation**: copy, confirm visibility, then delete the source
//! - **Thumbnails**: downscaled JPEG derivatives under a parallel prefix
//! - **Replication**: best-effort mirror of every archived image into a
//!   secondary S3-compatible backend
//!
//! ## Architecture
//!
//! ```text
//! Kafka Topic                 Primary Bucket                Replica Bucket
//! ┌──────────────┐           ┌──────────────────┐          ┌──────────────┐
//! │ S3 event     │           │ import/...       │          │ photos/      │
//! │ notifications│           │ photos/{Y/m/d}/  │          │   {Y/m/d}/   │
//! └──────────────┘           │ thumbs/{Y/m/d}/  │          └──────────────┘
//!        │                   └──────────────────┘                 ▲
//!        ▼                      ▲        ▲                        │
//! ┌──────────────┐              │        │                        │
//! │ Event        │──────────────┘        │                 ┌──────────────┐
//! │ Processor    │   fetch, relocate     │                 │ Replication  │
//! └──────────────┘                       │                 │ Sink         │
//!        │                        ┌──────────────┐         └──────────────┘
//!        ├───────────────────────▶│ Thumbnail    │                ▲
//!        │                        │ Generator    │                │
//!        │                        └──────────────┘                │
//!        └────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod kafka_consumer;
pub mod keys;
pub mod metadata;
pub mod notification;
pub mod processor;
pub mod relocator;
pub mod replication;
pub mod secrets;
pub mod storage;
pub mod thumbnail;

pub use config::Config;
pub use kafka_consumer::NotificationConsumer;
pub use keys::{KeyPolicy, KeyResolver};
pub use metadata::{ImageFormat, MetadataError, MetadataExtractor, ResolvedTimestamp};
pub use notification::{decode_key, NotificationRecord, S3Event};
pub use processor::{EventProcessor, ProcessorSettings, RecordError, SkipReason};
pub use relocator::{RelocationError, Relocator};
pub use replication::{ReplicationSink, SecretsBackedConnector};
pub use secrets::{SecretsManagerStore, SecretsStore};
pub use storage::{ObjectLocator, ObjectStorage, S3ObjectStorage};
pub use thumbnail::ThumbnailGenerator;
