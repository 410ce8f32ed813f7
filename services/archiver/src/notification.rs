use crate::storage::ObjectLocator;
use serde::Deserialize;
use thiserror::Error;

const CREATED_EVENT_PREFIX: &str = "ObjectCreated:";

/// An S3 event notification document as published by the backend
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

/// One record of an [`S3Event`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub aws_region: String,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    #[serde(alias = "Bucket")]
    pub bucket: S3Bucket,
    #[serde(alias = "Object")]
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    /// Object key, percent-encoded with `+` for spaces
    #[serde(alias = "Key")]
    pub key: String,
}

/// Coarse class of a storage event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Other(String),
}

impl EventKind {
    pub fn from_event_name(name: &str) -> Self {
        if name.starts_with(CREATED_EVENT_PREFIX) {
            EventKind::Created
        } else {
            EventKind::Other(name.to_string())
        }
    }
}

/// A single object event the archiver may act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub kind: EventKind,
    /// Source object; the key is still in its encoded form
    pub source: ObjectLocator,
    pub region: String,
}

impl From<&S3EventRecord> for NotificationRecord {
    fn from(record: &S3EventRecord) -> Self {
        Self {
            kind: EventKind::from_event_name(&record.event_name),
            source: ObjectLocator::new(
                record.s3.bucket.name.as_str(),
                record.s3.object.key.as_str(),
            ),
            region: record.aws_region.clone(),
        }
    }
}

impl S3Event {
    pub fn notifications(&self) -> impl Iterator<Item = NotificationRecord> + '_ {
        self.records.iter().map(NotificationRecord::from)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyDecodeError {
    #[error("invalid escape sequence in key {0:?}")]
    InvalidEscape(String),

    #[error("key {0:?} does not decode to UTF-8")]
    InvalidUtf8(String),
}

/// Decode an event key: `+` is a space and `%XX` a byte.
pub fn decode_key(raw: &str) -> Result<String, KeyDecodeError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .map(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                .unwrap_or(false);
            if !valid {
                return Err(KeyDecodeError::InvalidEscape(raw.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|_| KeyDecodeError::InvalidUtf8(raw.to_string()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn record(event_name: &str, bucket: &str, key: &str, region: &str) -> S3EventRecord {
        S3EventRecord {
            event_name: event_name.to_string(),
            aws_region: region.to_string(),
            s3: S3Entity {
                bucket: S3Bucket {
                    name: bucket.to_string(),
                },
                object: S3Object {
                    key: key.to_string(),
                },
            },
        }
    }
}
