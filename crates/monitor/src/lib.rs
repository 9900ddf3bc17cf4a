//! Polling directory monitor.
//!
//! A [`Monitor`] periodically walks a set of directories and hands every file
//! that has stopped changing to a [`FileCommand`], once per distinct content:
//!
//! 1. A file is first only recorded. Its modification time must hold still
//!    until the next scan before its content is hashed.
//! 2. The hash confirms the file is stable. A file whose hash matches the one
//!    it had when last processed successfully is skipped.
//! 3. Stable files are claimed atomically and dispatched inline, on a bounded
//!    task pool, or queued for [`Monitor::poll`].
//!
//! Item state and success/failure counters are checkpointed to a JSON status
//! file so a restarted monitor neither loses nor repeats work; files that
//! were in flight when the previous process died come back as
//! [`ItemStatus::Restart`].

mod checkpoint;
mod command;
mod digest;
pub mod error;
mod filter;
mod item;
mod scanner;
mod scheduler;
mod state;
mod status;
mod store;

pub use crate::checkpoint::{CHECKPOINT_VERSION, Checkpoint, LivenessMarker};
pub use crate::command::{
    CommandFactory, Completion, CycleHook, CycleReport, Dispatch, FileCommand, FnCommand, RemovedHook, command_fn,
};
pub use crate::digest::DigestAlgo;
pub use crate::filter::{FileFilter, REGEX_XML_EXTENSION, RegexFileFilter, RegularFiles};
pub use crate::item::{FileItem, ItemStatus};
pub use crate::scanner::{DirectoryScanner, Discovered, Verdict};
pub use crate::scheduler::{
    DEFAULT_INTERVAL, MINIMAL_INTERVAL, MINIMAL_REPORT_INTERVAL, Monitor, MonitorBuilder, normalize_interval,
    normalize_report_interval,
};
pub use crate::state::{CounterSnapshot, MonitorCounters, local_today};
pub use crate::status::StatusReport;
pub use crate::store::{FileItemStore, Outcome, Seen, Stability, StatusDiff};
