use crate::item::FileItem;
use crate::state::CounterSnapshot;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// What [`Monitor::status`](crate::Monitor::status) reports.
///
/// `changed` and `removed` are relative to the previous report; the first
/// report (and the one after
/// [`set_next_as_full_status`](crate::Monitor::set_next_as_full_status))
/// lists every item.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub changed: BTreeMap<PathBuf, FileItem>,
    pub removed: BTreeSet<PathBuf>,
    pub directories: Vec<PathBuf>,
    pub stop_file: Option<PathBuf>,
    pub status_file: Option<PathBuf>,
    pub interval_ms: u64,
    pub recursive: bool,
    pub counters: CounterSnapshot,
}

impl StatusReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
