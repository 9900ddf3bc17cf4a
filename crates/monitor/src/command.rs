//! What the monitor does with files once they are stable.

use crate::item::FileItem;
use crate::store::Outcome;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Result of running a [`FileCommand`] on one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub outcome: Outcome,
    /// Id to remember on the item (for example the transfer it started).
    pub correlation_id: Option<i64>,
}

impl Completion {
    #[must_use]
    pub fn success() -> Self {
        Self { outcome: Outcome::Success, correlation_id: None }
    }

    #[must_use]
    pub fn failure() -> Self {
        Self { outcome: Outcome::Failure, correlation_id: None }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: i64) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

impl From<bool> for Completion {
    fn from(ok: bool) -> Self {
        if ok { Self::success() } else { Self::failure() }
    }
}

/// Runs on each stable file. The monitor never looks at what it does.
#[async_trait]
pub trait FileCommand: Send + Sync {
    async fn run(&self, item: &FileItem) -> Completion;
}

/// Builds one command per dispatched file.
pub trait CommandFactory: Send + Sync {
    fn create(&self, item: &FileItem) -> Arc<dyn FileCommand>;
}

impl CommandFactory for Arc<dyn FileCommand> {
    fn create(&self, _item: &FileItem) -> Arc<dyn FileCommand> {
        Arc::clone(self)
    }
}

/// A synchronous closure used as a command.
pub struct FnCommand<F>(pub F);

#[async_trait]
impl<F> FileCommand for FnCommand<F>
where
    F: Fn(&FileItem) -> Completion + Send + Sync,
{
    async fn run(&self, item: &FileItem) -> Completion {
        (self.0)(item)
    }
}

/// Wrap a closure as a shareable command.
pub fn command_fn<F>(f: F) -> Arc<dyn FileCommand>
where
    F: Fn(&FileItem) -> Completion + Send + Sync + 'static,
{
    Arc::new(FnCommand(f))
}

/// How stable files are handed over.
#[derive(Clone, Default)]
pub enum Dispatch {
    /// Run each command to completion inside the scan, one at a time.
    Inline(Arc<dyn CommandFactory>),
    /// Run each command as its own task; at most `limit` at once, or
    /// unbounded when `None`.
    Pool { factory: Arc<dyn CommandFactory>, limit: Option<usize> },
    /// Claim the file and queue it for [`Monitor::poll`](crate::Monitor::poll).
    #[default]
    Queue,
}

impl Dispatch {
    /// One shared command, run inline.
    pub fn command(command: Arc<dyn FileCommand>) -> Self {
        Dispatch::Inline(Arc::new(command))
    }

    /// `0` is an unbounded pool, `1` runs inline, anything else is a pool of
    /// that size.
    pub fn with_parallelism(factory: Arc<dyn CommandFactory>, parallelism: usize) -> Self {
        match parallelism {
            0 => Dispatch::Pool { factory, limit: None },
            1 => Dispatch::Inline(factory),
            n => Dispatch::Pool { factory, limit: Some(n) },
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Inline(_) => f.write_str("Inline"),
            Dispatch::Pool { limit, .. } => f.debug_struct("Pool").field("limit", limit).finish(),
            Dispatch::Queue => f.write_str("Queue"),
        }
    }
}

/// Summary of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    /// Files accepted by the filter.
    pub seen: usize,
    pub dispatched: usize,
    /// Per-file and per-directory failures; the scan carried on.
    pub scan_errors: usize,
    /// Commands that panicked or were aborted. Suppresses the checkpoint.
    pub task_errors: usize,
    pub removed: usize,
    pub changed: bool,
    pub checkpointed: bool,
    /// The stop file was found, or the monitor was stopped.
    pub stopped: bool,
}

/// Called once for every item pruned because its file disappeared.
pub type RemovedHook = Arc<dyn Fn(&FileItem) + Send + Sync>;
/// Called after each cycle, or on its own timer.
pub type CycleHook = Arc<dyn Fn(&CycleReport) + Send + Sync>;
