use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Where a monitored file is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// Waiting to be confirmed stable (or re-confirmed after a failure).
    #[default]
    Valid,
    /// Was in flight when a previous run stopped; dispatch again.
    Restart,
    /// Handled successfully; ignored until its content changes.
    Done,
    /// Its content could not be read on the last attempt.
    InError,
}

/// One monitored file.
///
/// Two items are equal when their paths are; use
/// [`is_strictly_same`](Self::is_strictly_same) to compare every field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileItem {
    pub path: PathBuf,
    /// Hex content digest. `None` until the file has been hashed, and again
    /// after a failed dispatch.
    pub hash: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
    /// When the item was last claimed for dispatch.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_used: Option<OffsetDateTime>,
    /// Claimed by an in-flight command.
    pub used: bool,
    pub status: ItemStatus,
    /// Correlation id reported by the command (e.g. a transfer id).
    pub external_id: Option<i64>,
}

impl FileItem {
    pub fn new(path: impl Into<PathBuf>, last_modified: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            hash: None,
            last_modified: Some(last_modified),
            last_used: None,
            used: false,
            status: ItemStatus::Valid,
            external_id: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compare every field, not just the path.
    #[must_use]
    pub fn is_strictly_same(&self, other: &FileItem) -> bool {
        self.path == other.path
            && self.hash == other.hash
            && self.last_modified == other.last_modified
            && self.last_used == other.last_used
            && self.used == other.used
            && self.status == other.status
            && self.external_id == other.external_id
    }
}

impl PartialEq for FileItem {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}
impl Eq for FileItem {}

impl Hash for FileItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_path() {
        let now = OffsetDateTime::now_utc();
        let a = FileItem::new("/in/a.txt", now);
        let mut b = a.clone();
        b.hash = Some("abc".to_string());
        b.status = ItemStatus::Done;
        assert_eq!(a, b);
        assert!(!a.is_strictly_same(&b));
        assert!(a.is_strictly_same(&a.clone()));
        assert_ne!(a, FileItem::new("/in/b.txt", now));
    }

    #[test]
    fn test_serde_round_trip_keeps_every_field() {
        let mut item = FileItem::new("/in/a.txt", OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap());
        item.last_used = Some(OffsetDateTime::from_unix_timestamp_nanos(1_700_000_123_456_789_000).unwrap());
        item.used = true;
        item.status = ItemStatus::InError;
        item.external_id = Some(-42);

        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains(r#""status":"IN_ERROR""#));
        assert!(json.contains(r#""hash":null"#));
        let back: FileItem = serde_json::from_str(&json).unwrap();
        assert!(back.is_strictly_same(&item));
    }
}
