//! Directory listing entries as returned by the remote endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout used by the transfer service, always UTC.
pub const REMOTE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// Type of a listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
}

/// One child of a remote directory (cheap metadata, no content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub name: String,

    #[serde(rename = "type")]
    pub entry_type: EntryType,

    #[serde(default)]
    pub size: u64,

    /// Raw `"YYYY-MM-DD HH:MM:SS+00:00"` string; absent for some directories.
    #[serde(default)]
    pub last_modified: Option<String>,
}

impl ListingEntry {
    pub fn file(name: impl Into<String>, size: u64, last_modified: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_type: EntryType::File,
            size,
            last_modified: Some(last_modified.into()),
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_type: EntryType::Dir,
            size: 0,
            last_modified: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Dir
    }

    /// Parsed modification time, `None` if absent.
    pub fn modified_at(&self) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
        self.last_modified
            .as_deref()
            .map(parse_remote_timestamp)
            .transpose()
    }
}

/// Parse the transfer service's `"YYYY-MM-DD HH:MM:SS+00:00"` timestamps.
pub fn parse_remote_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_str(raw.trim(), REMOTE_TIMESTAMP_FORMAT).map(|dt| dt.with_timezone(&Utc))
}

/// Render a timestamp in the service's layout.
pub fn format_remote_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S+00:00").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_service_timestamps() {
        let parsed = parse_remote_timestamp("2023-01-01 00:00:00+00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn non_utc_offsets_are_normalized() {
        let parsed = parse_remote_timestamp("2023-06-01 12:30:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2023, 6, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn rejects_other_layouts() {
        assert!(parse_remote_timestamp("2023-01-01T00:00:00Z").is_err());
        assert!(parse_remote_timestamp("yesterday").is_err());
    }

    #[test]
    fn format_matches_parse() {
        let at = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 1).unwrap();
        let raw = format_remote_timestamp(at);
        assert_eq!(raw, "2024-02-29 23:59:01+00:00");
        assert_eq!(parse_remote_timestamp(&raw).unwrap(), at);
    }

    #[test]
    fn entries_deserialize_from_listing_json() {
        let raw = serde_json::json!({
            "name": "a.ipynb",
            "type": "file",
            "size": 120,
            "last_modified": "2023-01-01 00:00:00+00:00",
            "permissions": "0644"
        });
        let entry: ListingEntry = serde_json::from_value(raw).unwrap();
        assert_eq!(entry.entry_type, EntryType::File);
        assert!(entry.modified_at().unwrap().is_some());

        let dir: ListingEntry =
            serde_json::from_value(serde_json::json!({"name": "d", "type": "dir"})).unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.modified_at().unwrap(), None);
    }
}
