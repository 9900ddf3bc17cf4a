//! Concurrent state of every monitored file.
//!
//! The scanner and any number of command tasks share one [`FileItemStore`].
//! Each entry has its own claim flag (compare-and-set) and its own lock, so
//! unrelated files never contend with each other.

use crate::item::{FileItem, ItemStatus};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;

/// Result of sighting a file during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seen {
    /// First sighting; its mtime has been recorded.
    New,
    /// The mtime differs from the previous scan; recorded.
    TimeChanged,
    /// Same mtime as the previous scan: ready for hash confirmation.
    Unchanged,
    /// Claimed by an in-flight command; skip it entirely.
    InFlight,
}

/// Result of comparing a freshly computed hash with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// The content differs from the last hash; stored, wait another cycle.
    HashChanged,
    /// Stable and due for dispatch.
    Confirmed,
    /// Stable, but already handled successfully.
    AlreadyDone,
}

/// How a dispatched command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Items that changed since the last report, and paths that disappeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusDiff {
    pub changed: BTreeMap<PathBuf, FileItem>,
    pub removed: BTreeSet<PathBuf>,
}

#[derive(Debug)]
struct Entry {
    used: AtomicBool,
    item: Mutex<FileItem>,
}

impl Entry {
    fn new(item: FileItem) -> Arc<Self> {
        Arc::new(Self { used: AtomicBool::new(item.used), item: Mutex::new(item) })
    }

    fn snapshot(&self) -> FileItem {
        let mut item = self.item.lock().clone();
        item.used = self.used.load(Ordering::Acquire);
        item
    }
}

#[derive(Debug, Default)]
pub struct FileItemStore {
    items: DashMap<PathBuf, Arc<Entry>>,
    reported: Mutex<HashMap<PathBuf, FileItem>>,
}

impl FileItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, path: &Path) -> Option<Arc<Entry>> {
        self.items.get(path).map(|entry| Arc::clone(entry.value()))
    }

    /// Record a sighting of `path` with modification time `mtime`.
    pub fn upsert_seen(&self, path: &Path, mtime: OffsetDateTime) -> Seen {
        let entry = match self.items.entry(path.to_path_buf()) {
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(FileItem::new(path, mtime)));
                return Seen::New;
            },
            MapEntry::Occupied(occupied) => Arc::clone(occupied.get()),
        };
        if entry.used.load(Ordering::Acquire) {
            return Seen::InFlight;
        }
        let mut item = entry.item.lock();
        if item.last_modified == Some(mtime) {
            Seen::Unchanged
        } else {
            item.last_modified = Some(mtime);
            Seen::TimeChanged
        }
    }

    /// Compare a freshly computed content hash with the stored one.
    ///
    /// Only call this once [`upsert_seen`](Self::upsert_seen) reported
    /// [`Seen::Unchanged`]: hashing is reserved for files that have stopped
    /// being written to. An item without a stored hash (never hashed, or
    /// cleared by a failed dispatch) is confirmed straight away. Returns
    /// `None` when `path` is not tracked.
    pub fn confirm_stable(&self, path: &Path, hash: String) -> Option<Stability> {
        let entry = self.entry(path)?;
        let mut item = entry.item.lock();
        let stability = match item.hash.as_deref() {
            Some(previous) if previous != hash => {
                if matches!(item.status, ItemStatus::Done | ItemStatus::InError) {
                    item.status = ItemStatus::Valid;
                }
                Stability::HashChanged
            },
            Some(_) if item.status == ItemStatus::Done => Stability::AlreadyDone,
            _ => {
                if item.status == ItemStatus::InError {
                    item.status = ItemStatus::Valid;
                }
                Stability::Confirmed
            },
        };
        item.hash = Some(hash);
        Some(stability)
    }

    /// Atomically claim `path` for dispatch. Returns `false` if it is not
    /// tracked or already claimed.
    pub fn claim(&self, path: &Path) -> bool {
        let Some(entry) = self.entry(path) else {
            return false;
        };
        if entry.used.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return false;
        }
        entry.item.lock().last_used = Some(OffsetDateTime::now_utc());
        true
    }

    /// Hand a claimed item back with the command's outcome.
    ///
    /// Success marks it [`ItemStatus::Done`] and keeps its hash so unchanged
    /// content is never dispatched twice. Failure clears the hash, which
    /// sends the file back through confirmation and dispatch.
    pub fn release(&self, path: &Path, outcome: Outcome, correlation_id: Option<i64>) -> bool {
        let Some(entry) = self.entry(path) else {
            return false;
        };
        {
            let mut item = entry.item.lock();
            match outcome {
                Outcome::Success => item.status = ItemStatus::Done,
                Outcome::Failure => {
                    item.status = ItemStatus::Valid;
                    item.hash = None;
                },
            }
            if correlation_id.is_some() {
                item.external_id = correlation_id;
            }
        }
        entry.used.store(false, Ordering::Release);
        true
    }

    /// The content of `path` could not be hashed.
    pub fn mark_error(&self, path: &Path) {
        if let Some(entry) = self.entry(path) {
            let mut item = entry.item.lock();
            item.status = ItemStatus::InError;
            item.hash = None;
        }
    }

    /// Prune every item whose file no longer exists and return them.
    ///
    /// Touches the filesystem; call it from a blocking context.
    pub fn remove_vanished(&self) -> Vec<FileItem> {
        self.remove_matching(|path| !path.is_file())
    }

    /// Drop every item whose path satisfies `predicate` and return them.
    pub fn remove_matching(&self, predicate: impl Fn(&Path) -> bool) -> Vec<FileItem> {
        let matched: Vec<PathBuf> =
            self.items.iter().filter(|entry| predicate(entry.key())).map(|entry| entry.key().clone()).collect();
        matched
            .into_iter()
            .filter_map(|path| self.items.remove(&path))
            .map(|(_, entry)| entry.snapshot())
            .collect()
    }

    /// Items that differ from the last report, and paths that have gone
    /// since then. The current state becomes the new baseline. With no
    /// baseline (first call, or after [`reset_baseline`](Self::reset_baseline))
    /// every item is reported.
    pub fn snapshot_diff(&self) -> StatusDiff {
        let current: HashMap<PathBuf, FileItem> =
            self.items.iter().map(|entry| (entry.key().clone(), entry.value().snapshot())).collect();
        let mut reported = self.reported.lock();
        let mut diff = StatusDiff::default();
        for (path, item) in &current {
            if reported.get(path).is_none_or(|previous| !previous.is_strictly_same(item)) {
                diff.changed.insert(path.clone(), item.clone());
            }
        }
        diff.removed = reported.keys().filter(|path| !current.contains_key(*path)).cloned().collect();
        *reported = current;
        diff
    }

    /// Make the next [`snapshot_diff`](Self::snapshot_diff) a full report.
    pub fn reset_baseline(&self) {
        self.reported.lock().clear();
    }

    /// Every item, ordered by path.
    pub fn snapshot(&self) -> Vec<FileItem> {
        let mut items: Vec<FileItem> = self.items.iter().map(|entry| entry.value().snapshot()).collect();
        items.sort_by(|a, b| a.path.cmp(&b.path));
        items
    }

    /// Load items from a checkpoint.
    ///
    /// Items that were claimed when the checkpoint was written belonged to a
    /// process that is gone: they come back unclaimed with
    /// [`ItemStatus::Restart`]. Returns how many were recovered that way.
    pub fn restore(&self, items: impl IntoIterator<Item = FileItem>) -> usize {
        let mut recovered = 0;
        for mut item in items {
            if item.used {
                item.used = false;
                item.status = ItemStatus::Restart;
                recovered += 1;
            }
            self.items.insert(item.path.clone(), Entry::new(item));
        }
        recovered
    }

    pub fn get(&self, path: &Path) -> Option<FileItem> {
        self.entry(path).map(|entry| entry.snapshot())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn at(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(seconds).unwrap()
    }

    #[test]
    fn test_upsert_seen_sequence() {
        let store = FileItemStore::new();
        let path = Path::new("/in/a.txt");
        assert_eq!(store.upsert_seen(path, at(10)), Seen::New);
        assert_eq!(store.upsert_seen(path, at(10)), Seen::Unchanged);
        assert_eq!(store.upsert_seen(path, at(11)), Seen::TimeChanged);
        assert_eq!(store.upsert_seen(path, at(11)), Seen::Unchanged);
        assert!(store.claim(path));
        assert_eq!(store.upsert_seen(path, at(12)), Seen::InFlight);
        assert_eq!(store.len(), 1);
    }

    #[rstest]
    #[case(None, ItemStatus::Valid, "h1", Stability::Confirmed, ItemStatus::Valid)]
    #[case(Some("h1"), ItemStatus::Valid, "h1", Stability::Confirmed, ItemStatus::Valid)]
    #[case(Some("h1"), ItemStatus::Restart, "h1", Stability::Confirmed, ItemStatus::Restart)]
    #[case(Some("h1"), ItemStatus::Done, "h1", Stability::AlreadyDone, ItemStatus::Done)]
    #[case(Some("h1"), ItemStatus::Done, "h2", Stability::HashChanged, ItemStatus::Valid)]
    #[case(Some("h1"), ItemStatus::Valid, "h2", Stability::HashChanged, ItemStatus::Valid)]
    #[case(None, ItemStatus::InError, "h1", Stability::Confirmed, ItemStatus::Valid)]
    fn test_confirm_stable(
        #[case] stored: Option<&str>,
        #[case] status: ItemStatus,
        #[case] fresh: &str,
        #[case] expected: Stability,
        #[case] status_after: ItemStatus,
    ) {
        let store = FileItemStore::new();
        let mut item = FileItem::new("/in/a.txt", at(1));
        item.hash = stored.map(str::to_string);
        item.status = status;
        store.restore([item]);

        let path = Path::new("/in/a.txt");
        assert_eq!(store.confirm_stable(path, fresh.to_string()), Some(expected));
        let item = store.get(path).unwrap();
        assert_eq!(item.hash.as_deref(), Some(fresh));
        assert_eq!(item.status, status_after);
    }

    #[test]
    fn test_confirm_unknown_path() {
        let store = FileItemStore::new();
        assert_eq!(store.confirm_stable(Path::new("/nope"), "h".to_string()), None);
        assert!(!store.claim(Path::new("/nope")));
        assert!(!store.release(Path::new("/nope"), Outcome::Success, None));
    }

    #[test]
    fn test_release_outcomes() {
        let store = FileItemStore::new();
        let path = Path::new("/in/a.txt");
        store.upsert_seen(path, at(1));
        store.confirm_stable(path, "h1".to_string());

        assert!(store.claim(path));
        assert!(!store.claim(path));
        let claimed = store.get(path).unwrap();
        assert!(claimed.used);
        assert!(claimed.last_used.is_some());

        store.release(path, Outcome::Success, Some(7));
        let item = store.get(path).unwrap();
        assert_eq!((item.used, item.status, item.hash.as_deref(), item.external_id), (false, ItemStatus::Done, Some("h1"), Some(7)));

        assert!(store.claim(path));
        store.release(path, Outcome::Failure, None);
        let item = store.get(path).unwrap();
        assert_eq!((item.used, item.status, item.hash.as_deref(), item.external_id), (false, ItemStatus::Valid, None, Some(7)));
    }

    #[test]
    fn test_mark_error_clears_hash() {
        let store = FileItemStore::new();
        let path = Path::new("/in/a.txt");
        store.upsert_seen(path, at(1));
        store.confirm_stable(path, "h1".to_string());
        store.mark_error(path);
        let item = store.get(path).unwrap();
        assert_eq!((item.status, item.hash), (ItemStatus::InError, None));
    }

    #[test]
    fn test_restore_recovers_in_flight_items() {
        let store = FileItemStore::new();
        let mut in_flight = FileItem::new("/in/a.txt", at(1));
        in_flight.used = true;
        in_flight.hash = Some("h1".to_string());
        in_flight.external_id = Some(99);
        let idle = FileItem::new("/in/b.txt", at(1));

        assert_eq!(store.restore([in_flight, idle]), 1);
        let item = store.get(Path::new("/in/a.txt")).unwrap();
        assert_eq!((item.used, item.status, item.external_id), (false, ItemStatus::Restart, Some(99)));
        assert!(store.claim(Path::new("/in/a.txt")));
    }

    #[test]
    fn test_snapshot_diff_baseline() {
        let store = FileItemStore::new();
        store.upsert_seen(Path::new("/in/a.txt"), at(1));
        store.upsert_seen(Path::new("/in/b.txt"), at(1));

        let first = store.snapshot_diff();
        assert_eq!(first.changed.len(), 2);
        assert!(first.removed.is_empty());

        assert!(store.snapshot_diff().changed.is_empty());

        store.upsert_seen(Path::new("/in/a.txt"), at(2));
        store.items.remove(Path::new("/in/b.txt"));
        let diff = store.snapshot_diff();
        assert_eq!(diff.changed.keys().collect::<Vec<_>>(), vec![Path::new("/in/a.txt")]);
        assert_eq!(diff.removed.iter().collect::<Vec<_>>(), vec![Path::new("/in/b.txt")]);

        store.reset_baseline();
        assert_eq!(store.snapshot_diff().changed.len(), 1);
    }

    #[test]
    fn test_remove_vanished_once() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.txt");
        let gone = dir.path().join("gone.txt");
        std::fs::write(&kept, b"k").unwrap();
        std::fs::write(&gone, b"g").unwrap();

        let store = FileItemStore::new();
        store.upsert_seen(&kept, at(1));
        store.upsert_seen(&gone, at(1));
        std::fs::remove_file(&gone).unwrap();

        let removed = store.remove_vanished();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].path, gone);
        assert!(store.remove_vanished().is_empty());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_remove_matching_prefix() {
        let store = FileItemStore::new();
        for path in ["/in/a.txt", "/in/sub/b.txt", "/input/c.txt", "/out/d.txt"] {
            store.upsert_seen(Path::new(path), at(1));
        }
        let mut removed: Vec<PathBuf> =
            store.remove_matching(|path| path.starts_with("/in")).into_iter().map(|item| item.path).collect();
        removed.sort();
        assert_eq!(removed, vec![PathBuf::from("/in/a.txt"), PathBuf::from("/in/sub/b.txt")]);
        assert_eq!(store.len(), 2);
        assert!(store.get(Path::new("/input/c.txt")).is_some());
    }
}
