use crate::config::Config;
use crate::keys::{file_name, KeyResolver};
use crate::metadata::{ImageFormat, MetadataError, MetadataExtractor, ResolvedTimestamp};
use crate::notification::{decode_key, EventKind, KeyDecodeError, NotificationRecord, S3Event};
use crate::relocator::{RelocationError, Relocator};
use crate::replication::ReplicationSink;
use crate::storage::{ObjectLocator, ObjectStorage, StorageError};
use crate::thumbnail::ThumbnailGenerator;
use anyhow::Context;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Why a record was not acted upon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Not an object-creation event
    NotCreated(String),
    UndecodableKey(KeyDecodeError),
    OutsidePrefix,
    /// The key names a directory rather than a file
    NoFileName,
    RegionMismatch { expected: String, actual: String },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotCreated(_) => "event_kind",
            SkipReason::UndecodableKey(_) => "undecodable_key",
            SkipReason::OutsidePrefix => "prefix",
            SkipReason::NoFileName => "no_file_name",
            SkipReason::RegionMismatch { .. } => "region",
        }
    }
}

/// Failure of an eligible record; the record is abandoned, the batch goes on
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("error fetching object: {0}")]
    Fetch(#[source] StorageError),

    #[error("unsupported content type {content_type:?}, only JPEG, HEIC and CR3 are archived")]
    UnsupportedContent { content_type: Option<String> },

    #[error("failed to obtain timestamp: {0}")]
    Metadata(#[source] MetadataError),

    #[error("failed to move object: {0}")]
    Relocation(#[source] RelocationError),
}

impl RecordError {
    /// Stage label for logs and metrics
    pub fn stage(&self) -> &'static str {
        match self {
            RecordError::Fetch(_) => "fetch",
            RecordError::UnsupportedContent { .. } => "content_type",
            RecordError::Metadata(_) => "metadata",
            RecordError::Relocation(e) => e.stage(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Skipped(SkipReason),
    Relocated { destination: ObjectLocator },
}

/// Static settings of an [`EventProcessor`]
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Region every notification must come from
    pub expected_region: String,
    /// Target bucket; the notification's bucket when `None`
    pub destination_bucket: Option<String>,
    /// Storage class hint for permanent copies
    pub storage_class: Option<String>,
    /// Build identifier included in per-record logs
    pub build_stamp: String,
}

/// Processes notification batches: filter, fetch, date, relocate, derive, mirror
pub struct EventProcessor {
    storage: Arc<dyn ObjectStorage>,
    keys: KeyResolver,
    extractor: MetadataExtractor,
    relocator: Relocator,
    thumbnails: Option<ThumbnailGenerator>,
    replication: Option<Arc<ReplicationSink>>,
    settings: ProcessorSettings,
}

impl EventProcessor {
    pub fn new(storage: Arc<dyn ObjectStorage>, keys: KeyResolver, settings: ProcessorSettings) -> Self {
        let relocator = Relocator::new(storage.clone(), settings.storage_class.clone());
        Self {
            storage,
            keys,
            extractor: MetadataExtractor::new(),
            relocator,
            thumbnails: None,
            replication: None,
            settings,
        }
    }

    /// Wire a processor from service configuration
    pub fn from_config(
        config: &Config,
        storage: Arc<dyn ObjectStorage>,
        replication: Option<Arc<ReplicationSink>>,
    ) -> Self {
        let keys = KeyResolver::new(
            config.archive.source_prefix.as_str(),
            config.archive.destination_prefix.as_str(),
            config.thumbnails.prefix.as_str(),
            config.archive.key_policy,
        );
        let settings = ProcessorSettings {
            expected_region: config.expected_region().to_string(),
            destination_bucket: config.archive.destination_bucket.clone(),
            storage_class: config.archive.storage_class().map(String::from),
            build_stamp: config
                .service
                .build_stamp
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
        };

        let mut processor = Self::new(storage, keys, settings);
        if config.thumbnails.enabled {
            processor = processor.with_thumbnails(ThumbnailGenerator::new(config.thumbnails.long_edge));
        }
        if let Some(sink) = replication {
            processor = processor.with_replication(sink);
        }
        processor
    }

    pub fn with_thumbnails(mut self, generator: ThumbnailGenerator) -> Self {
        self.thumbnails = Some(generator);
        self
    }

    pub fn with_replication(mut self, sink: Arc<ReplicationSink>) -> Self {
        self.replication = Some(sink);
        self
    }

    /// Process every record of `event` in order and return how many were relocated.
    ///
    /// Per-record failures are logged and counted in metrics; they never stop
    /// the batch.
    pub async fn process_batch(&self, event: &S3Event) -> usize {
        let started = Instant::now();
        let mut processed = 0;

        for record in event.notifications() {
            metrics::counter!("archiver.records.received").increment(1);
            info!(
                build = %self.settings.build_stamp,
                bucket = %record.source.bucket,
                key = %record.source.key,
                "Received request for object"
            );

            match self.process_record(&record).await {
                Ok(RecordOutcome::Relocated { destination }) => {
                    info!(
                        build = %self.settings.build_stamp,
                        source = %record.source,
                        destination = %destination,
                        "Processed request for object"
                    );
                    processed += 1;
                }
                Ok(RecordOutcome::Skipped(reason)) => {
                    metrics::counter!("archiver.records.skipped", "reason" => reason.as_str())
                        .increment(1);
                }
                Err(e) => {
                    let duplicate_data =
                        matches!(&e, RecordError::Relocation(r) if r.leaves_duplicate());
                    error!(
                        build = %self.settings.build_stamp,
                        source = %record.source,
                        stage = e.stage(),
                        duplicate_data,
                        error = %e,
                        "Failed to process object"
                    );
                    metrics::counter!("archiver.records.failed", "stage" => e.stage())
                        .increment(1);
                }
            }
        }

        metrics::histogram!("archiver.batch.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        processed
    }

    /// Run one record through the pipeline
    #[instrument(skip(self, record), fields(bucket = %record.source.bucket, key = %record.source.key))]
    pub async fn process_record(
        &self,
        record: &NotificationRecord,
    ) -> Result<RecordOutcome, RecordError> {
        let key = match self.eligible_key(record) {
            Ok(key) => key,
            Err(reason) => return Ok(RecordOutcome::Skipped(reason)),
        };
        let source = ObjectLocator::new(record.source.bucket.as_str(), key);

        let object = self
            .storage
            .get_object(&source)
            .await
            .map_err(RecordError::Fetch)?;

        let format = ImageFormat::from_object(object.content_type.as_deref(), &source.key)
            .ok_or_else(|| RecordError::UnsupportedContent {
                content_type: object.content_type.clone(),
            })?;

        let resolved = self.content_timestamp(&object.body, format)?;

        let destination = ObjectLocator::new(
            self.settings
                .destination_bucket
                .clone()
                .unwrap_or_else(|| source.bucket.clone()),
            self.keys.resolve_destination(&source.key, &resolved.timestamp),
        );

        self.relocator
            .relocate(&source, &destination)
            .await
            .map_err(RecordError::Relocation)?;
        metrics::counter!("archiver.records.relocated").increment(1);

        // Everything below is best-effort
        if let Some(generator) = &self.thumbnails {
            if format == ImageFormat::Jpeg {
                match self
                    .store_thumbnail(generator, object.body.clone(), &destination)
                    .await
                {
                    Ok(thumbnail) => {
                        debug!(
                            thumbnail = %thumbnail,
                            long_edge = generator.long_edge(),
                            "Thumbnail stored"
                        );
                        metrics::counter!("archiver.thumbnails.stored").increment(1);
                    }
                    Err(e) => {
                        warn!(error = %format!("{e:#}"), "Thumbnail generation failed");
                        metrics::counter!("archiver.thumbnails.failed").increment(1);
                    }
                }
            } else {
                debug!(%format, "No thumbnail codec for container");
            }
        }

        if let Some(sink) = &self.replication {
            match sink
                .store(object.body.clone(), &destination.key, format.content_type())
                .await
            {
                Ok(()) => metrics::counter!("archiver.replication.stored").increment(1),
                Err(e) => {
                    warn!(
                        error = %e,
                        bucket = %sink.bucket(),
                        key = %destination.key,
                        "Replication failed"
                    );
                    metrics::counter!("archiver.replication.failed").increment(1);
                }
            }
        }

        Ok(RecordOutcome::Relocated { destination })
    }

    /// Decide whether a record is acted upon, returning its decoded key
    fn eligible_key(&self, record: &NotificationRecord) -> Result<String, SkipReason> {
        if let EventKind::Other(name) = &record.kind {
            debug!(event = %name, "Ignoring non-creation event");
            return Err(SkipReason::NotCreated(name.clone()));
        }

        let key = decode_key(&record.source.key).map_err(|e| {
            warn!(error = %e, "Failed to decode the key");
            SkipReason::UndecodableKey(e)
        })?;

        if !key.starts_with(self.keys.source_prefix()) {
            debug!(prefix = %self.keys.source_prefix(), "Key outside source prefix");
            return Err(SkipReason::OutsidePrefix);
        }

        if file_name(&key).is_empty() {
            warn!(key = %key, "Key does not name a file");
            return Err(SkipReason::NoFileName);
        }

        // Should never happen: the bucket notifies a consumer in its own region
        if record.region != self.settings.expected_region {
            warn!(
                got = %record.region,
                wanted = %self.settings.expected_region,
                "Event is not from the expected region"
            );
            return Err(SkipReason::RegionMismatch {
                expected: self.settings.expected_region.clone(),
                actual: record.region.clone(),
            });
        }

        Ok(key)
    }

    /// Content timestamp, falling back to now on soft metadata failures
    fn content_timestamp(
        &self,
        body: &[u8],
        format: ImageFormat,
    ) -> Result<ResolvedTimestamp, RecordError> {
        let resolved = match self.extractor.extract(body, format) {
            Ok(resolved) => resolved,
            Err(e) if e.is_hard() => return Err(RecordError::Metadata(e)),
            Err(e) => {
                warn!(error = %e, "Could not read image metadata, using current time");
                ResolvedTimestamp::fallback(Utc::now())
            }
        };

        metrics::counter!("archiver.timestamp.source", "source" => resolved.source.as_str())
            .increment(1);
        debug!(
            timestamp = %resolved.timestamp,
            source = %resolved.source,
            "Resolved content timestamp"
        );

        Ok(resolved)
    }

    async fn store_thumbnail(
        &self,
        generator: &ThumbnailGenerator,
        body: Bytes,
        destination: &ObjectLocator,
    ) -> anyhow::Result<ObjectLocator> {
        let generator = generator.clone();
        let thumbnail = tokio::task::spawn_blocking(move || generator.generate(&body))
            .await
            .context("thumbnail task panicked")??;

        let locator = ObjectLocator::new(
            destination.bucket.as_str(),
            self.keys.resolve_thumbnail(&destination.key),
        );
        self.storage
            .put_object(&locator, thumbnail, ImageFormat::Jpeg.content_type())
            .await
            .context("failed to store thumbnail")?;

        Ok(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPolicy;
    use crate::metadata::fixtures::{cr3_with, heic_with, jpeg_with, tiff_with};
    use crate::notification::fixtures::record;
    use crate::replication::{ReplicaConnector, ReplicationError};
    use crate::storage::testing::MemoryStorage;
    use crate::storage::Operation;
    use async_trait::async_trait;

    const BUCKET: &str = "family-photos";
    const REGION: &str = "eu-west-2";
    const CREATED: &str = "ObjectCreated:Put";

    fn settings() -> ProcessorSettings {
        ProcessorSettings {
            expected_region: REGION.to_string(),
            destination_bucket: None,
            storage_class: Some("STANDARD_IA".to_string()),
            build_stamp: "test".to_string(),
        }
    }

    fn processor(storage: Arc<MemoryStorage>) -> EventProcessor {
        EventProcessor::new(
            storage,
            KeyResolver::new("import/", "photos/", "thumbs/", KeyPolicy::Preserve),
            settings(),
        )
        .with_thumbnails(ThumbnailGenerator::new(200))
    }

    fn dated_jpeg() -> Vec<u8> {
        jpeg_with(&[(exif::Tag::DateTimeOriginal, "2020:12:23 16:20:00")])
    }

    fn put_jpeg(storage: &MemoryStorage, key: &str) {
        storage.insert(ObjectLocator::new(BUCKET, key), Some("image/jpeg"), dated_jpeg());
    }

    fn batch(records: Vec<crate::notification::S3EventRecord>) -> S3Event {
        S3Event { records }
    }

    struct FixedConnector(Arc<MemoryStorage>);

    #[async_trait]
    impl ReplicaConnector for FixedConnector {
        async fn connect(&self) -> Result<Arc<dyn ObjectStorage>, ReplicationError> {
            let storage: Arc<dyn ObjectStorage> = self.0.clone();
            Ok(storage)
        }
    }

    #[tokio::test]
    async fn test_scenario_preserve_policy() {
        let storage = Arc::new(MemoryStorage::new());
        put_jpeg(&storage, "import/robert/img2.jpg");

        let count = processor(storage.clone())
            .process_batch(&batch(vec![record(CREATED, BUCKET, "import/robert/img2.jpg", REGION)]))
            .await;

        assert_eq!(count, 1);
        assert!(!storage.contains(&ObjectLocator::new(BUCKET, "import/robert/img2.jpg")));
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "photos/robert/2020/12/23/img2.jpg")));

        let thumbnail = storage
            .object(&ObjectLocator::new(BUCKET, "thumbs/robert/2020/12/23/img2.jpg"))
            .expect("thumbnail stored");
        assert_eq!(thumbnail.content_type.as_deref(), Some("image/jpeg"));
        let decoded = image::load_from_memory(&thumbnail.body).unwrap();
        assert_eq!(image::GenericImageView::dimensions(&decoded), (200, 200));
    }

    #[tokio::test]
    async fn test_count_ignores_ineligible_records() {
        let storage = Arc::new(MemoryStorage::new());
        put_jpeg(&storage, "import/a.jpg");
        put_jpeg(&storage, "import/trip/b.jpg");
        put_jpeg(&storage, "elsewhere/c.jpg");
        put_jpeg(&storage, "import/d.jpg");

        let event = batch(vec![
            record(CREATED, BUCKET, "import/a.jpg", REGION),
            record(CREATED, BUCKET, "elsewhere/c.jpg", REGION),
            record("ObjectRemoved:Delete", BUCKET, "import/d.jpg", REGION),
            record(CREATED, BUCKET, "import/d.jpg", "us-east-1"),
            record(CREATED, BUCKET, "import/%zz.jpg", REGION),
            record(CREATED, BUCKET, "import/", REGION),
            record(CREATED, BUCKET, "import/trip/b.jpg", REGION),
        ]);

        let count = processor(storage.clone()).process_batch(&event).await;

        assert_eq!(count, 2);
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "elsewhere/c.jpg")));
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "import/d.jpg")));
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "photos/2020/12/23/a.jpg")));
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "photos/trip/2020/12/23/b.jpg")));
    }

    #[tokio::test]
    async fn test_skip_reasons() {
        let storage = Arc::new(MemoryStorage::new());
        let processor = processor(storage.clone());

        let outcome = |event: &str, key: &str, region: &str| {
            let record = NotificationRecord::from(&record(event, BUCKET, key, region));
            processor.eligible_key(&record)
        };

        assert_eq!(outcome(CREATED, "import/a+b.jpg", REGION), Ok("import/a b.jpg".to_string()));
        assert!(matches!(
            outcome("ObjectRemoved:Delete", "import/a.jpg", REGION),
            Err(SkipReason::NotCreated(_))
        ));
        assert_eq!(outcome(CREATED, "other/a.jpg", REGION), Err(SkipReason::OutsidePrefix));
        assert_eq!(outcome(CREATED, "import/sub/", REGION), Err(SkipReason::NoFileName));
        let undecodable = outcome(CREATED, "import/%zz", REGION).unwrap_err();
        assert!(matches!(undecodable, SkipReason::UndecodableKey(_)));
        assert_eq!(undecodable.clone(), undecodable);
        assert_eq!(undecodable.as_str(), "undecodable_key");
        assert_eq!(
            outcome(CREATED, "import/a.jpg", "us-east-1"),
            Err(SkipReason::RegionMismatch {
                expected: REGION.to_string(),
                actual: "us-east-1".to_string(),
            })
        );
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn test_encoded_key_is_fetched_decoded() {
        let storage = Arc::new(MemoryStorage::new());
        put_jpeg(&storage, "import/my trip/IMG 1.jpg");

        let count = processor(storage.clone())
            .process_batch(&batch(vec![record(CREATED, BUCKET, "import/my+trip/IMG%201.jpg", REGION)]))
            .await;

        assert_eq!(count, 1);
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "photos/my trip/2020/12/23/IMG 1.jpg")));
    }

    #[tokio::test]
    async fn test_unsupported_content_type_is_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let source = ObjectLocator::new(BUCKET, "import/notes.jpg");
        storage.insert(source.clone(), Some("text/plain"), dated_jpeg());

        let result = processor(storage.clone())
            .process_record(&NotificationRecord::from(&record(CREATED, BUCKET, "import/notes.jpg", REGION)))
            .await;

        assert!(matches!(result, Err(RecordError::UnsupportedContent { .. })));
        assert!(storage.contains(&source));
    }

    #[tokio::test]
    async fn test_container_mismatch_aborts_record() {
        let storage = Arc::new(MemoryStorage::new());
        let source = ObjectLocator::new(BUCKET, "import/fake.jpg");
        let cr3 = cr3_with(&[(exif::Tag::DateTime, "2019:03:04 05:06:07")], &[]);
        storage.insert(source.clone(), Some("image/jpeg"), cr3);

        let result = processor(storage.clone())
            .process_record(&NotificationRecord::from(&record(CREATED, BUCKET, "import/fake.jpg", REGION)))
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.stage(), "metadata");
        assert!(storage.contains(&source));
    }

    #[tokio::test]
    async fn test_cr3_is_relocated_without_thumbnail() {
        let storage = Arc::new(MemoryStorage::new());
        let cr3 = cr3_with(
            &[(exif::Tag::DateTime, "2019:03:04 05:06:07")],
            &[(exif::Tag::DateTimeOriginal, "2018:07:01 12:00:00")],
        );
        storage.insert(ObjectLocator::new(BUCKET, "import/IMG_0001.CR3"), None, cr3);

        let count = processor(storage.clone())
            .process_batch(&batch(vec![record(CREATED, BUCKET, "import/IMG_0001.CR3", REGION)]))
            .await;

        assert_eq!(count, 1);
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "photos/2018/07/01/IMG_0001.CR3")));
        assert!(!storage
            .calls()
            .iter()
            .any(|(op, _)| *op == Operation::Put));
    }

    #[tokio::test]
    async fn test_unreadable_metadata_falls_back_to_now() {
        let storage = Arc::new(MemoryStorage::new());
        let source = ObjectLocator::new(BUCKET, "import/broken.jpg");
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x40];
        bytes.extend(b"Exif\0\0MM\0*garbage");
        storage.insert(source.clone(), Some("image/jpeg"), bytes);

        let before = Utc::now();
        let outcome = processor(storage.clone())
            .process_record(&NotificationRecord::from(&record(CREATED, BUCKET, "import/broken.jpg", REGION)))
            .await
            .unwrap();
        let after = Utc::now();

        let RecordOutcome::Relocated { destination } = outcome else {
            panic!("expected relocation, got {outcome:?}");
        };
        let candidates = [
            format!("photos/{}broken.jpg", before.format("%Y/%m/%d/")),
            format!("photos/{}broken.jpg", after.format("%Y/%m/%d/")),
        ];
        assert!(candidates.contains(&destination.key));
        assert!(!storage.contains(&source));
    }

    #[tokio::test]
    async fn test_thumbnail_failure_still_counts() {
        let storage = Arc::new(MemoryStorage::new());
        let tiff = tiff_with(&[(exif::Tag::DateTimeOriginal, "2020:12:23 16:20:00")]);
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE1];
        bytes.extend(((2 + 6 + tiff.len()) as u16).to_be_bytes());
        bytes.extend(b"Exif\0\0");
        bytes.extend(&tiff);
        bytes.extend(b"no image data follows");
        storage.insert(ObjectLocator::new(BUCKET, "import/headless.jpg"), Some("image/jpeg"), bytes);

        let count = processor(storage.clone())
            .process_batch(&batch(vec![record(CREATED, BUCKET, "import/headless.jpg", REGION)]))
            .await;

        assert_eq!(count, 1);
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "photos/2020/12/23/headless.jpg")));
        assert!(!storage.contains(&ObjectLocator::new(BUCKET, "thumbs/2020/12/23/headless.jpg")));
    }

    #[tokio::test]
    async fn test_relocation_failure_does_not_stop_batch() {
        let storage = Arc::new(MemoryStorage::new());
        put_jpeg(&storage, "import/a.jpg");
        put_jpeg(&storage, "import/b.jpg");
        storage.fail_on(Operation::Copy, "photos/2020/12/23/a.jpg");

        let count = processor(storage.clone())
            .process_batch(&batch(vec![
                record(CREATED, BUCKET, "import/a.jpg", REGION),
                record(CREATED, BUCKET, "import/b.jpg", REGION),
            ]))
            .await;

        assert_eq!(count, 1);
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "import/a.jpg")));
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "photos/2020/12/23/b.jpg")));
    }

    #[tokio::test]
    async fn test_delete_failure_is_reported_by_stage() {
        let storage = Arc::new(MemoryStorage::new());
        put_jpeg(&storage, "import/a.jpg");
        storage.fail_on(Operation::Delete, "import/a.jpg");

        let err = processor(storage.clone())
            .process_record(&NotificationRecord::from(&record(CREATED, BUCKET, "import/a.jpg", REGION)))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "delete");
        assert!(matches!(err, RecordError::Relocation(ref r) if r.leaves_duplicate()));
    }

    #[tokio::test]
    async fn test_destination_bucket_override() {
        let storage = Arc::new(MemoryStorage::new());
        put_jpeg(&storage, "import/a.jpg");

        let processor = EventProcessor::new(
            storage.clone(),
            KeyResolver::new("import/", "photos/", "thumbs/", KeyPolicy::Flatten),
            ProcessorSettings {
                destination_bucket: Some("archive".to_string()),
                ..settings()
            },
        );

        let count = processor
            .process_batch(&batch(vec![record(CREATED, BUCKET, "import/a.jpg", REGION)]))
            .await;

        assert_eq!(count, 1);
        assert!(storage.contains(&ObjectLocator::new("archive", "photos/2020/12/23/a.jpg")));
    }

    #[tokio::test]
    async fn test_from_config_honours_disabled_thumbnails() {
        let storage = Arc::new(MemoryStorage::new());
        put_jpeg(&storage, "incoming/a.jpg");

        let config: Config = serde_json::from_str::<Config>(
            r#"{
                "kafka": { "bootstrap_servers": "localhost:9092" },
                "archive": { "source_prefix": "incoming", "storage_class": "" },
                "thumbnails": { "enabled": false }
            }"#,
        )
        .unwrap()
        .normalized();

        let count = EventProcessor::from_config(&config, storage.clone(), None)
            .process_batch(&batch(vec![record(CREATED, BUCKET, "incoming/a.jpg", REGION)]))
            .await;

        assert_eq!(count, 1);
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "photos/2020/12/23/a.jpg")));
        assert!(!storage.calls().iter().any(|(op, _)| *op == Operation::Put));
    }

    #[tokio::test]
    async fn test_from_config_wires_thumbnails_and_replica() {
        let config: Config = serde_json::from_str::<Config>(
            r#"{
                "kafka": { "bootstrap_servers": "localhost:9092" },
                "thumbnails": { "long_edge": 120 }
            }"#,
        )
        .unwrap()
        .normalized();

        let sink = Arc::new(ReplicationSink::new(
            Arc::new(FixedConnector(Arc::new(MemoryStorage::new()))),
            "mirror",
        ));
        let processor =
            EventProcessor::from_config(&config, Arc::new(MemoryStorage::new()), Some(sink));

        assert_eq!(
            processor.thumbnails.as_ref().map(ThumbnailGenerator::long_edge),
            Some(120)
        );
        assert_eq!(
            processor.replication.as_ref().map(|sink| sink.bucket()),
            Some("mirror")
        );
    }

    #[tokio::test]
    async fn test_heic_is_relocated_without_thumbnail() {
        let storage = Arc::new(MemoryStorage::new());
        let heic = heic_with(&[(exif::Tag::DateTimeOriginal, "2021:08:14 09:30:00")]);
        storage.insert(ObjectLocator::new(BUCKET, "import/IMG_0420.HEIC"), Some("image/heic"), heic);

        let count = processor(storage.clone())
            .process_batch(&batch(vec![record(CREATED, BUCKET, "import/IMG_0420.HEIC", REGION)]))
            .await;

        assert_eq!(count, 1);
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "photos/2021/08/14/IMG_0420.HEIC")));
        assert!(!storage.calls().iter().any(|(op, _)| *op == Operation::Put));
    }

    #[tokio::test]
    async fn test_replication_mirrors_original() {
        let storage = Arc::new(MemoryStorage::new());
        let mirror = Arc::new(MemoryStorage::new());
        put_jpeg(&storage, "import/a.jpg");

        let sink = Arc::new(ReplicationSink::new(Arc::new(FixedConnector(mirror.clone())), "mirror"));
        let count = processor(storage.clone())
            .with_replication(sink)
            .process_batch(&batch(vec![record(CREATED, BUCKET, "import/a.jpg", REGION)]))
            .await;

        assert_eq!(count, 1);
        let copy = mirror
            .object(&ObjectLocator::new("mirror", "photos/2020/12/23/a.jpg"))
            .expect("mirrored");
        assert_eq!(copy.body, Bytes::from(dated_jpeg()));
    }

    #[tokio::test]
    async fn test_replication_failure_still_counts() {
        let storage = Arc::new(MemoryStorage::new());
        let mirror = Arc::new(MemoryStorage::new());
        mirror.fail_on(Operation::Put, "photos/2020/12/23/a.jpg");
        put_jpeg(&storage, "import/a.jpg");

        let sink = Arc::new(ReplicationSink::new(Arc::new(FixedConnector(mirror)), "mirror"));
        let count = processor(storage.clone())
            .with_replication(sink)
            .process_batch(&batch(vec![record(CREATED, BUCKET, "import/a.jpg", REGION)]))
            .await;

        assert_eq!(count, 1);
        assert!(storage.contains(&ObjectLocator::new(BUCKET, "photos/2020/12/23/a.jpg")));
    }
}
