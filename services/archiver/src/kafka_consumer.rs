use crate::config::KafkaConfig;
use crate::notification::S3Event;
use crate::processor::EventProcessor;
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Kafka consumer for bucket notification documents
pub struct NotificationConsumer {
    consumer: StreamConsumer,
    processor: Arc<EventProcessor>,
}

impl NotificationConsumer {
    /// Create a consumer subscribed to the notification topic
    pub fn new(config: &KafkaConfig, processor: Arc<EventProcessor>) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string());

        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.notification_topic])
            .context("Failed to subscribe to notification topic")?;

        info!(
            topic = %config.notification_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            processor,
        })
    }

    /// Consume notification batches until the stream ends
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting notification consumer");

        let mut message_stream = self.consumer.stream();

        while let Some(message_result) = message_stream.next().await {
            match message_result {
                Ok(message) => match self.process_message(&message).await {
                    Ok(processed) => {
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "Failed to commit offset");
                        }
                        info!(
                            partition = message.partition(),
                            offset = message.offset(),
                            processed,
                            "Batch complete"
                        );
                    }
                    Err(e) => {
                        error!(
                            error = %format!("{e:#}"),
                            partition = message.partition(),
                            offset = message.offset(),
                            "Failed to process message"
                        );
                        metrics::counter!("archiver.messages.failed").increment(1);
                    }
                },
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("archiver.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<usize> {
        let event = decode_event(message.payload())?;
        debug!(records = event.records.len(), "Received notification batch");

        Ok(self.processor.process_batch(&event).await)
    }
}

/// Parse a message payload into a notification batch
pub fn decode_event(payload: Option<&[u8]>) -> Result<S3Event> {
    let payload = payload.context("Message has no payload")?;
    serde_json::from_slice(payload).context("Failed to deserialize S3 event notification")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event() {
        let payload = br#"{"Records": [{
            "eventName": "ObjectCreated:CompleteMultipartUpload",
            "awsRegion": "eu-west-2",
            "s3": {"bucket": {"name": "family-photos"}, "object": {"key": "import/a.jpg"}}
        }]}"#;

        let event = decode_event(Some(payload)).unwrap();
        assert_eq!(event.records.len(), 1);
        assert_eq!(event.records[0].s3.object.key, "import/a.jpg");
    }

    #[test]
    fn test_decode_event_missing_payload() {
        let err = decode_event(None).unwrap_err();
        assert!(err.to_string().contains("no payload"));
    }

    #[test]
    fn test_decode_event_malformed() {
        assert!(decode_event(Some(b"{\"Records\": [{\"s3\": 7}]}")).is_err());
        assert!(decode_event(Some(b"not json")).is_err());
    }
}
