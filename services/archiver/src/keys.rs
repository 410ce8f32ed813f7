use chrono::{DateTime, Utc};
use serde::Deserialize;

/// What happens to the directories between the source prefix and the file name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Keep the sub-path below the source prefix, ahead of the date segments
    #[default]
    Preserve,
    /// Drop every directory and keep only the file name
    Flatten,
}

/// Derives permanent and thumbnail keys from incoming keys.
///
/// Pure and deterministic: the same key and timestamp always produce the
/// same destination.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    source_prefix: String,
    destination_prefix: String,
    thumbnail_prefix: String,
    policy: KeyPolicy,
}

impl KeyResolver {
    pub fn new(
        source_prefix: impl Into<String>,
        destination_prefix: impl Into<String>,
        thumbnail_prefix: impl Into<String>,
        policy: KeyPolicy,
    ) -> Self {
        Self {
            source_prefix: source_prefix.into(),
            destination_prefix: destination_prefix.into(),
            thumbnail_prefix: thumbnail_prefix.into(),
            policy,
        }
    }

    pub fn source_prefix(&self) -> &str {
        &self.source_prefix
    }

    /// Build the permanent key for `source_key`.
    ///
    /// Format: `{destination_prefix}{sub_path}{YYYY}/{MM}/{DD}/{file_name}`, where
    /// `sub_path` is empty under [`KeyPolicy::Flatten`].
    pub fn resolve_destination(&self, source_key: &str, timestamp: &DateTime<Utc>) -> String {
        let (dir, name) = split_key(source_key);
        let sub_path = match self.policy {
            KeyPolicy::Flatten => "",
            KeyPolicy::Preserve => dir.strip_prefix(self.source_prefix.as_str()).unwrap_or(dir),
        };

        format!(
            "{prefix}{sub_path}{date}{name}",
            prefix = self.destination_prefix,
            sub_path = sub_path,
            date = timestamp.format("%Y/%m/%d/"),
            name = name
        )
    }

    /// Swap the destination prefix of a permanent key for the thumbnail prefix
    pub fn resolve_thumbnail(&self, destination_key: &str) -> String {
        let suffix = destination_key
            .strip_prefix(self.destination_prefix.as_str())
            .unwrap_or(destination_key);
        format!("{}{}", self.thumbnail_prefix, suffix)
    }
}

/// Last path segment of a key; empty when the key names a directory
pub fn file_name(key: &str) -> &str {
    split_key(key).1
}

fn split_key(key: &str) -> (&str, &str) {
    match key.rfind('/') {
        Some(idx) => key.split_at(idx + 1),
        None => ("", key),
    }
}
