use crate::checkpoint::{Checkpoint, LivenessMarker};
use crate::command::{Completion, CycleHook, CycleReport, Dispatch, FileCommand, RemovedHook};
use crate::digest::DigestAlgo;
use crate::error::{ErrorKind, Result};
use crate::filter::{FileFilter, RegularFiles};
use crate::item::FileItem;
use crate::scanner::{DirectoryScanner, Verdict};
use crate::state::{CounterSnapshot, MonitorCounters, local_today};
use crate::status::StatusReport;
use crate::store::{FileItemStore, Outcome};
use drover_asyncutils::{Backoff, CancellationToken};
use exn::ResultExt;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Span, debug, error, info, instrument, warn};

/// Shortest allowed pause between cycles.
pub const MINIMAL_INTERVAL: Duration = Duration::from_millis(100);
/// Pause between cycles when none (or one below the floor) is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
/// Shortest period for the cycle hook's own timer.
pub const MINIMAL_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Round down to a multiple of 10ms. Anything under [`MINIMAL_INTERVAL`]
/// falls back to [`DEFAULT_INTERVAL`].
pub fn normalize_interval(interval: Duration) -> Duration {
    if interval < MINIMAL_INTERVAL {
        return DEFAULT_INTERVAL;
    }
    Duration::from_millis(interval.as_millis() as u64 / 10 * 10)
}

/// The cycle hook gets its own timer only for periods of at least
/// [`MINIMAL_REPORT_INTERVAL`]; otherwise it runs after each cycle.
pub fn normalize_report_interval(interval: Duration) -> Option<Duration> {
    (interval >= MINIMAL_REPORT_INTERVAL).then(|| Duration::from_millis(interval.as_millis() as u64 / 10 * 10))
}

pub struct MonitorBuilder {
    name: String,
    directories: Vec<PathBuf>,
    status_file: Option<PathBuf>,
    stop_file: Option<PathBuf>,
    interval: Duration,
    recursive: bool,
    digest: DigestAlgo,
    filter: Arc<dyn FileFilter>,
    dispatch: Dispatch,
    on_removed: Option<RemovedHook>,
    on_cycle: Option<CycleHook>,
    report_interval: Option<Duration>,
}

impl MonitorBuilder {
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directories.push(directory.into());
        self
    }

    pub fn directories<I, P>(mut self, directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.directories.extend(directories.into_iter().map(Into::into));
        self
    }

    /// Where to keep the checkpoint. Without one, state lives in memory only.
    pub fn status_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_file = Some(path.into());
        self
    }

    /// The monitor stops at the next cycle boundary once this path exists.
    pub fn stop_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stop_file = Some(path.into());
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = normalize_interval(interval);
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn digest(mut self, digest: DigestAlgo) -> Self {
        self.digest = digest;
        self
    }

    pub fn filter(mut self, filter: Arc<dyn FileFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Shorthand for [`Dispatch::command`].
    pub fn command(self, command: Arc<dyn FileCommand>) -> Self {
        self.dispatch(Dispatch::command(command))
    }

    pub fn on_removed(mut self, hook: impl Fn(&FileItem) + Send + Sync + 'static) -> Self {
        self.on_removed = Some(Arc::new(hook));
        self
    }

    pub fn on_cycle(mut self, hook: impl Fn(&CycleReport) + Send + Sync + 'static) -> Self {
        self.on_cycle = Some(Arc::new(hook));
        self
    }

    /// Run the cycle hook on its own timer instead of after each cycle.
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = normalize_report_interval(interval);
        self
    }

    pub fn build(self) -> Monitor {
        let limiter = match &self.dispatch {
            Dispatch::Pool { limit: Some(limit), .. } => Some(Arc::new(Semaphore::new((*limit).max(1)))),
            _ => None,
        };
        let marker = self.status_file.as_deref().map(LivenessMarker::for_status_file);
        Monitor {
            shared: Arc::new(Shared {
                name: self.name,
                directories: Mutex::new(self.directories),
                status_file: self.status_file,
                stop_file: self.stop_file,
                interval: self.interval,
                report_interval: self.report_interval,
                scanner: DirectoryScanner::new(self.filter, self.recursive, self.digest),
                store: FileItemStore::new(),
                counters: MonitorCounters::new(local_today()),
                dispatch: self.dispatch,
                limiter,
                queue: Mutex::new(VecDeque::new()),
                on_removed: self.on_removed,
                on_cycle: self.on_cycle,
                last_report: Mutex::new(CycleReport::default()),
                marker,
                cancel: CancellationToken::new(),
                wake: Notify::new(),
                cycles: AtomicU64::new(0),
                dirty: AtomicBool::new(false),
            }),
        }
    }
}

struct Shared {
    name: String,
    directories: Mutex<Vec<PathBuf>>,
    status_file: Option<PathBuf>,
    stop_file: Option<PathBuf>,
    interval: Duration,
    report_interval: Option<Duration>,
    scanner: DirectoryScanner,
    store: FileItemStore,
    counters: MonitorCounters,
    dispatch: Dispatch,
    limiter: Option<Arc<Semaphore>>,
    queue: Mutex<VecDeque<PathBuf>>,
    on_removed: Option<RemovedHook>,
    on_cycle: Option<CycleHook>,
    last_report: Mutex<CycleReport>,
    marker: Option<LivenessMarker>,
    cancel: CancellationToken,
    wake: Notify,
    cycles: AtomicU64,
    /// State changed outside a scan (pull-mode release, directory removal).
    dirty: AtomicBool,
}

/// A polling directory monitor.
///
/// Cheap to clone: every clone controls the same monitor, so one can run
/// the loop (see [`start`](Self::start)) while others poll, report status
/// or stop it.
#[derive(Clone)]
pub struct Monitor {
    shared: Arc<Shared>,
}

impl Monitor {
    pub fn builder(name: impl Into<String>) -> MonitorBuilder {
        MonitorBuilder {
            name: name.into(),
            directories: Vec::new(),
            status_file: None,
            stop_file: None,
            interval: DEFAULT_INTERVAL,
            recursive: false,
            digest: DigestAlgo::default(),
            filter: Arc::new(RegularFiles),
            dispatch: Dispatch::default(),
            on_removed: None,
            on_cycle: None,
            report_interval: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn store(&self) -> &FileItemStore {
        &self.shared.store
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    /// Number of tracked files.
    pub fn history_len(&self) -> usize {
        self.shared.store.len()
    }

    pub fn directories(&self) -> Vec<PathBuf> {
        self.shared.directories.lock().clone()
    }

    /// Start watching `directory` from the next cycle on.
    pub fn add_directory(&self, directory: impl Into<PathBuf>) {
        let directory = directory.into();
        let mut directories = self.shared.directories.lock();
        if !directories.contains(&directory) {
            directories.push(directory);
        }
    }

    /// Stop watching `directory` and stop tracking the files under it,
    /// unless another watched directory still covers them. Returns how many
    /// items were dropped.
    pub fn remove_directory(&self, directory: &Path) -> usize {
        let remaining = {
            let mut directories = self.shared.directories.lock();
            directories.retain(|d| d != directory);
            directories.clone()
        };
        let dropped = self
            .shared
            .store
            .remove_matching(|path| path.starts_with(directory) && !remaining.iter().any(|d| path.starts_with(d)));
        if dropped.is_empty() {
            return 0;
        }
        info!(directory = %directory.display(), items = dropped.len(), "Directory no longer watched");
        self.untrack(&dropped);
        self.shared.dirty.store(true, Ordering::Release);
        dropped.len()
    }

    /// Take the next queued file (pull mode). It stays claimed until
    /// [`release`](Self::release) is called for it.
    pub fn poll(&self) -> Option<FileItem> {
        let mut queue = self.shared.queue.lock();
        while let Some(path) = queue.pop_front() {
            if let Some(item) = self.shared.store.get(&path) {
                return Some(item);
            }
        }
        None
    }

    /// Look at the next queued file without taking it.
    pub fn peek(&self) -> Option<FileItem> {
        let queue = self.shared.queue.lock();
        queue.iter().find_map(|path| self.shared.store.get(path))
    }

    /// Report the outcome for a file taken with [`poll`](Self::poll).
    pub fn release(&self, path: &Path, completion: Completion) -> bool {
        let released = self.shared.store.release(path, completion.outcome, completion.correlation_id);
        if released {
            self.shared.counters.record(completion.outcome);
            self.shared.dirty.store(true, Ordering::Release);
        }
        released
    }

    /// Items changed since the previous report, plus configuration and
    /// counters.
    pub fn status(&self) -> StatusReport {
        let diff = self.shared.store.snapshot_diff();
        StatusReport {
            name: self.shared.name.clone(),
            changed: diff.changed,
            removed: diff.removed,
            directories: self.directories(),
            stop_file: self.shared.stop_file.clone(),
            status_file: self.shared.status_file.clone(),
            interval_ms: self.shared.interval.as_millis() as u64,
            recursive: self.shared.scanner.is_recursive(),
            counters: self.counters(),
        }
    }

    /// Make the next [`status`](Self::status) list every item.
    pub fn set_next_as_full_status(&self) {
        self.shared.store.reset_baseline();
    }

    /// Report from the most recent cycle.
    pub fn last_report(&self) -> CycleReport {
        self.shared.last_report.lock().clone()
    }

    /// Run the next cycle now instead of waiting for the interval.
    pub fn wake(&self) {
        self.shared.wake.notify_one();
    }

    /// Stop after the current cycle.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Run [`run`](Self::run) on a new task.
    pub fn start(&self) -> JoinHandle<Result<()>> {
        let monitor = self.clone();
        tokio::spawn(async move { monitor.run().await })
    }

    /// Load the checkpoint and run cycles until stopped or the stop file
    /// appears.
    ///
    /// Fails with [`ErrorKind::AlreadyRunning`] if another monitor is
    /// keeping this checkpoint's liveness marker fresh.
    pub async fn run(&self) -> Result<()> {
        self.prepare().await?;
        info!(monitor = %self.shared.name, interval_ms = self.shared.interval.as_millis() as u64, "Monitor started");
        let reporter = self.spawn_reporter();
        loop {
            let report = self.run_cycle().await;
            if report.stopped {
                break;
            }
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break,
                _ = self.shared.wake.notified() => debug!("Woken early"),
                _ = tokio::time::sleep(self.shared.interval) => {},
            }
        }
        if let Some(reporter) = reporter {
            reporter.abort();
        }
        if let Some(marker) = &self.shared.marker
            && let Err(err) = marker.remove().await
        {
            warn!(error = ?err, "Could not remove liveness marker");
        }
        info!(monitor = %self.shared.name, "Monitor stopped");
        Ok(())
    }

    async fn prepare(&self) -> Result<()> {
        let (Some(status_file), Some(marker)) = (&self.shared.status_file, &self.shared.marker) else {
            return Ok(());
        };
        let probe = Backoff::fixed(self.shared.interval, 11);
        marker.ensure_single_instance(&probe, &self.shared.cancel).await?;
        match Checkpoint::load(status_file).await {
            Ok(Some(checkpoint)) => {
                let items = checkpoint.items.len();
                let recovered = self.shared.store.restore(checkpoint.items);
                self.shared.counters.restore(checkpoint.counters, local_today());
                info!(status_file = %status_file.display(), items, recovered, "Checkpoint loaded");
            },
            Ok(None) => debug!(status_file = %status_file.display(), "No checkpoint, starting empty"),
            Err(err) => warn!(status_file = %status_file.display(), error = ?err, "Could not load checkpoint, starting empty"),
        }
        if let Err(err) = marker.touch().await {
            warn!(error = ?err, "Could not create liveness marker");
        }
        Ok(())
    }

    fn spawn_reporter(&self) -> Option<JoinHandle<()>> {
        let period = self.shared.report_interval?;
        let hook = self.shared.on_cycle.clone()?;
        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => return,
                    _ = tokio::time::sleep(period) => {},
                }
                let report = shared.last_report.lock().clone();
                hook(&report);
            }
        }))
    }

    async fn stop_requested(&self) -> bool {
        if self.shared.cancel.is_cancelled() {
            return true;
        }
        let Some(stop_file) = &self.shared.stop_file else {
            return false;
        };
        if tokio::fs::try_exists(stop_file).await.unwrap_or(false) {
            warn!(monitor = %self.shared.name, stop_file = %stop_file.display(), "Stop file found");
            self.shared.cancel.cancel();
            return true;
        }
        false
    }

    /// One scan cycle.
    ///
    /// Scans every directory and dispatches stable files, then waits for
    /// every command started by this cycle. Only if none of them panicked
    /// does it prune vanished files and checkpoint (or, when nothing
    /// changed, just refresh the liveness marker).
    #[instrument(skip(self), fields(monitor = %self.shared.name, cycle = tracing::field::Empty))]
    pub async fn run_cycle(&self) -> CycleReport {
        let shared = &self.shared;
        let cycle = shared.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        Span::current().record("cycle", cycle);
        let mut report = CycleReport { cycle, ..CycleReport::default() };

        if shared.counters.roll_over(local_today()) {
            debug!("Daily counters reset");
            report.changed = true;
        }
        if self.stop_requested().await {
            report.stopped = true;
            *shared.last_report.lock() = report.clone();
            return report;
        }

        let mut tasks = JoinSet::new();
        self.scan(&mut tasks, &mut report).await;
        while let Some(joined) = tasks.join_next().await {
            let failed = match joined {
                Ok(result) => result.err(),
                Err(err) => Some(exn::Exn::from(err).raise(ErrorKind::Command)),
            };
            if let Some(err) = failed {
                error!(error = ?err, "Command task failed");
                report.task_errors += 1;
            }
        }

        if report.task_errors > 0 {
            warn!(task_errors = report.task_errors, "Skipping prune and checkpoint for this cycle");
        } else {
            report.removed = self.prune().await;
            report.changed |= report.removed > 0;
            report.changed |= shared.dirty.swap(false, Ordering::AcqRel);
            self.persist(&mut report).await;
        }

        if !report.stopped && self.stop_requested().await {
            report.stopped = true;
        }
        if shared.report_interval.is_none()
            && let Some(hook) = &shared.on_cycle
        {
            hook(&report);
        }
        *shared.last_report.lock() = report.clone();
        report
    }

    async fn scan(&self, tasks: &mut JoinSet<Result<()>>, report: &mut CycleReport) {
        let shared = &self.shared;
        let directories = self.directories();
        let walk = shared.scanner.walk(&directories);
        tokio::pin!(walk);
        while let Some(found) = walk.next().await {
            if shared.cancel.is_cancelled() {
                report.stopped = true;
                break;
            }
            let file = match found {
                Ok(file) => file,
                Err(_) => {
                    report.scan_errors += 1;
                    continue;
                },
            };
            report.seen += 1;
            let verdict = shared.scanner.classify(&shared.store, &file).await;
            report.changed |= verdict.changes_state();
            match verdict {
                Verdict::Failed => report.scan_errors += 1,
                Verdict::Ready if shared.store.claim(&file.path) => {
                    report.dispatched += 1;
                    if let Err(err) = self.dispatch(&file.path, tasks).await {
                        error!(path = %file.path.display(), error = ?err, "Command failed to complete");
                        report.task_errors += 1;
                    }
                },
                _ => {},
            }
        }
    }

    async fn dispatch(&self, path: &Path, tasks: &mut JoinSet<Result<()>>) -> Result<()> {
        let Some(item) = self.shared.store.get(path) else {
            return Ok(());
        };
        info!(path = %path.display(), status = ?item.status, "Dispatching stable file");
        match &self.shared.dispatch {
            Dispatch::Queue => {
                self.shared.queue.lock().push_back(path.to_path_buf());
                Ok(())
            },
            Dispatch::Inline(factory) => {
                let command = factory.create(&item);
                execute(&self.shared, command, item).await
            },
            Dispatch::Pool { factory, .. } => {
                let command = factory.create(&item);
                let shared = Arc::clone(&self.shared);
                tasks.spawn(async move {
                    let _permit = match &shared.limiter {
                        Some(limiter) => Some(Arc::clone(limiter).acquire_owned().await.or_raise(|| ErrorKind::Stopped)?),
                        None => None,
                    };
                    execute(&shared, command, item).await
                });
                Ok(())
            },
        }
    }

    async fn prune(&self) -> usize {
        let shared = Arc::clone(&self.shared);
        let removed = match tokio::task::spawn_blocking(move || shared.store.remove_vanished()).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = ?err, "Could not prune vanished files");
                return 0;
            },
        };
        for item in &removed {
            info!(path = %item.path.display(), "File vanished");
        }
        self.untrack(&removed);
        removed.len()
    }

    /// Forget queued paths for items already dropped from the store and run
    /// the removal hook for each.
    fn untrack(&self, removed: &[FileItem]) {
        if removed.is_empty() {
            return;
        }
        self.shared.queue.lock().retain(|path| !removed.iter().any(|item| &item.path == path));
        if let Some(hook) = &self.shared.on_removed {
            for item in removed {
                hook(item);
            }
        }
    }

    async fn persist(&self, report: &mut CycleReport) {
        let (Some(status_file), Some(marker)) = (&self.shared.status_file, &self.shared.marker) else {
            return;
        };
        if report.changed {
            let checkpoint =
                Checkpoint::new(self.shared.name.clone(), self.shared.counters.snapshot(), self.shared.store.snapshot());
            match checkpoint.save(status_file).await {
                Ok(()) => report.checkpointed = true,
                Err(err) => {
                    warn!(status_file = %status_file.display(), error = ?err, "Could not save checkpoint");
                    self.shared.dirty.store(true, Ordering::Release);
                },
            }
        }
        if let Err(err) = marker.touch().await {
            warn!(marker = %marker.path().display(), error = ?err, "Could not touch liveness marker");
        }
    }
}

/// Run one command and hand the item back to the store. A panicking command
/// counts as a failure for the item and as an error for the cycle.
async fn execute(shared: &Shared, command: Arc<dyn FileCommand>, item: FileItem) -> Result<()> {
    let completion = AssertUnwindSafe(command.run(&item)).catch_unwind().await;
    let (completion, panicked) = match completion {
        Ok(completion) => (completion, false),
        Err(_) => (Completion::failure(), true),
    };
    shared.store.release(&item.path, completion.outcome, completion.correlation_id);
    shared.counters.record(completion.outcome);
    match completion.outcome {
        Outcome::Success => debug!(path = %item.path.display(), "Command succeeded"),
        Outcome::Failure => warn!(path = %item.path.display(), "Command failed, file will be retried"),
    }
    if panicked {
        exn::bail!(ErrorKind::Command);
    }
    Ok(())
}
