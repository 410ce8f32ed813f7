//! Content timestamp extraction.
//!
//! Date fields are read from the EXIF block of JPEG and HEIF containers, and
//! from the CMT TIFF blocks Canon embeds in CR3 files. The fields are then run
//! through a fixed priority table, see [`resolve_timestamp`].

use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed-width EXIF date-time layout, no offset
const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

const TAG_DATETIME: u16 = 0x0132;
const TAG_DATETIME_ORIGINAL: u16 = 0x9003;
const TAG_DATETIME_DIGITIZED: u16 = 0x9004;

/// Canon's metadata container inside `moov`
const CANON_UUID: [u8; 16] = [
    0x85, 0xc0, 0xb6, 0x87, 0x82, 0x0f, 0x11, 0xe0, 0x81, 0x11, 0xf4, 0xce, 0x46, 0x2b, 0x6a, 0x48,
];
const CANON_METADATA_BOXES: [&[u8; 4]; 4] = [b"CMT1", b"CMT2", b"CMT3", b"CMT4"];

/// Supported image containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Heic,
    Cr3,
}

impl ImageFormat {
    /// Classify a fetched object by content type and file extension.
    ///
    /// `None` means the object is not an image the archiver accepts.
    pub fn from_object(content_type: Option<&str>, key: &str) -> Option<Self> {
        let key = key.to_ascii_lowercase();
        if key.ends_with(".cr3") {
            return Some(ImageFormat::Cr3);
        }
        if key.ends_with(".heic") || key.ends_with(".heif") {
            return Some(ImageFormat::Heic);
        }

        match content_type.map(|ct| ct.trim().to_ascii_lowercase()).as_deref() {
            Some("image/jpeg") => Some(ImageFormat::Jpeg),
            Some("image/heic") | Some("image/heif") => Some(ImageFormat::Heic),
            _ => None,
        }
    }

    /// Detect the container from its leading bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ImageFormat::Jpeg);
        }

        if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
            return match &bytes[8..12] {
                b"crx " => Some(ImageFormat::Cr3),
                b"heic" | b"heix" | b"heim" | b"heis" | b"hevc" | b"hevx" | b"mif1" | b"msf1" => {
                    Some(ImageFormat::Heic)
                }
                _ => None,
            };
        }

        None
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Heic => "image/heic",
            ImageFormat::Cr3 => "image/x-canon-cr3",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Heic => "HEIC",
            ImageFormat::Cr3 => "CR3",
        };
        f.write_str(name)
    }
}

/// Errors raised while reading image metadata
#[derive(Error, Debug)]
pub enum MetadataError {
    /// The bytes are a different container than the object claimed to be
    #[error("object declared as {declared} but contains a {detected} container")]
    ContainerMismatch {
        declared: ImageFormat,
        detected: ImageFormat,
    },

    #[error("failed to decode image metadata: {0}")]
    Decode(String),
}

impl MetadataError {
    /// Hard failures abort the record; anything else falls back to the current time
    pub fn is_hard(&self) -> bool {
        matches!(self, MetadataError::ContainerMismatch { .. })
    }
}

/// Raw date strings found in an image, by role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateFields {
    /// DateTimeOriginal (capture time)
    pub original: Option<String>,
    /// DateTimeDigitized (creation time)
    pub created: Option<String>,
    /// DateTime (modification time)
    pub modified: Option<String>,
}

impl DateFields {
    fn from_exif(exif: &exif::Exif) -> Self {
        let mut dates = Self::default();
        for field in exif.fields().filter(|f| f.ifd_num == exif::In::PRIMARY) {
            let slot = match field.tag.number() {
                TAG_DATETIME_ORIGINAL => &mut dates.original,
                TAG_DATETIME_DIGITIZED => &mut dates.created,
                TAG_DATETIME => &mut dates.modified,
                _ => continue,
            };
            if slot.is_none() {
                *slot = ascii_value(&field.value);
            }
        }
        dates
    }

    /// Fill any missing roles from `other`
    fn merge(&mut self, other: DateFields) {
        self.original = self.original.take().or(other.original);
        self.created = self.created.take().or(other.created);
        self.modified = self.modified.take().or(other.modified);
    }
}

fn ascii_value(value: &exif::Value) -> Option<String> {
    match value {
        exif::Value::Ascii(parts) => parts.first().map(|raw| {
            String::from_utf8_lossy(raw)
                .trim_end_matches('\0')
                .trim()
                .to_string()
        }),
        _ => None,
    }
}

/// Which field a timestamp came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    Original,
    Created,
    Modified,
    Fallback,
}

impl TimestampSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampSource::Original => "original",
            TimestampSource::Created => "created",
            TimestampSource::Modified => "modified",
            TimestampSource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for TimestampSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTimestamp {
    pub timestamp: DateTime<Utc>,
    pub source: TimestampSource,
}

impl ResolvedTimestamp {
    pub fn fallback(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            source: TimestampSource::Fallback,
        }
    }
}

/// Pick the content timestamp: original > created > modified > `now`.
///
/// A field that is present but unparseable is treated as absent.
pub fn resolve_timestamp(fields: &DateFields, now: DateTime<Utc>) -> ResolvedTimestamp {
    let candidates = [
        (TimestampSource::Original, &fields.original),
        (TimestampSource::Created, &fields.created),
        (TimestampSource::Modified, &fields.modified),
    ];

    for (source, value) in candidates {
        let Some(raw) = value else { continue };
        match parse_exif_datetime(raw) {
            Some(timestamp) => return ResolvedTimestamp { timestamp, source },
            None => warn!(field = %source, value = %raw, "Unparseable date field"),
        }
    }

    ResolvedTimestamp::fallback(now)
}

/// Parse `YYYY:MM:DD HH:MM:SS` as a naive UTC time
pub fn parse_exif_datetime(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), EXIF_DATETIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Reads the best available content timestamp out of image bytes
#[derive(Debug, Clone, Default)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the content timestamp of an image declared as `declared`
    pub fn extract(
        &self,
        bytes: &[u8],
        declared: ImageFormat,
    ) -> Result<ResolvedTimestamp, MetadataError> {
        self.extract_at(bytes, declared, Utc::now())
    }

    /// As [`MetadataExtractor::extract`], with an explicit fallback time
    pub fn extract_at(
        &self,
        bytes: &[u8],
        declared: ImageFormat,
        now: DateTime<Utc>,
    ) -> Result<ResolvedTimestamp, MetadataError> {
        let fields = self.read_date_fields(bytes, declared)?;
        debug!(?fields, "Read date fields");
        Ok(resolve_timestamp(&fields, now))
    }

    /// Read the raw date fields without resolving them
    pub fn read_date_fields(
        &self,
        bytes: &[u8],
        declared: ImageFormat,
    ) -> Result<DateFields, MetadataError> {
        let detected = ImageFormat::sniff(bytes)
            .ok_or_else(|| MetadataError::Decode("unrecognised image container".to_string()))?;

        if detected != declared {
            return Err(MetadataError::ContainerMismatch { declared, detected });
        }

        match detected {
            ImageFormat::Jpeg | ImageFormat::Heic => read_container_exif(bytes),
            ImageFormat::Cr3 => read_cr3_exif(bytes),
        }
    }
}

fn read_container_exif(bytes: &[u8]) -> Result<DateFields, MetadataError> {
    match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => Ok(DateFields::from_exif(&exif)),
        // No EXIF block at all: nothing to prioritise
        Err(exif::Error::NotFound(_)) => Ok(DateFields::default()),
        Err(e) => Err(MetadataError::Decode(e.to_string())),
    }
}

fn read_cr3_exif(bytes: &[u8]) -> Result<DateFields, MetadataError> {
    let moov = find_box(&iso_boxes(bytes)?, b"moov")
        .ok_or_else(|| MetadataError::Decode("CR3 file has no moov box".to_string()))?;

    let canon = iso_boxes(moov)?
        .into_iter()
        .find(|(kind, payload)| kind == b"uuid" && payload.starts_with(&CANON_UUID))
        .map(|(_, payload)| &payload[CANON_UUID.len()..])
        .ok_or_else(|| MetadataError::Decode("CR3 file has no Canon metadata box".to_string()))?;

    let mut dates = DateFields::default();
    for (kind, payload) in iso_boxes(canon)? {
        if !CANON_METADATA_BOXES.contains(&&kind) {
            continue;
        }
        let exif = exif::Reader::new()
            .read_raw(payload.to_vec())
            .map_err(|e| MetadataError::Decode(format!("CR3 metadata block: {e}")))?;
        dates.merge(DateFields::from_exif(&exif));
    }

    Ok(dates)
}

type IsoBox<'a> = ([u8; 4], &'a [u8]);

fn find_box<'a>(boxes: &[IsoBox<'a>], kind: &[u8; 4]) -> Option<&'a [u8]> {
    boxes.iter().find(|(k, _)| k == kind).map(|(_, payload)| *payload)
}

/// Split an ISO-BMFF byte range into (type, payload) pairs
fn iso_boxes(data: &[u8]) -> Result<Vec<IsoBox<'_>>, MetadataError> {
    let truncated = || MetadataError::Decode("truncated ISO-BMFF box".to_string());
    let mut boxes = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let header = data.get(offset..offset + 8).ok_or_else(truncated)?;
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];

        let (size, header_len) = match size32 {
            0 => (data.len() - offset, 8),
            1 => {
                let large = data.get(offset + 8..offset + 16).ok_or_else(truncated)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(large);
                let size = usize::try_from(u64::from_be_bytes(raw)).map_err(|_| truncated())?;
                (size, 16)
            }
            n => (n as usize, 8),
        };

        if size < header_len {
            return Err(truncated());
        }
        let end = offset.checked_add(size).ok_or_else(truncated)?;
        let payload = data.get(offset + header_len..end).ok_or_else(truncated)?;

        boxes.push((kind, payload));
        offset = end;
    }

    Ok(boxes)
}
