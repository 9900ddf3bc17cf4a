use derive_more::{Display, Error};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// The wait was abandoned because its cancellation token fired first.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
#[display("wait cancelled before the gate opened")]
pub struct Cancelled;

/// One-shot readiness latch.
///
/// Starts closed. [`open`](Self::open) is idempotent and can never be undone;
/// share the gate behind an [`Arc`](std::sync::Arc) between the party that
/// configures a connection and the party that must not touch it before then.
#[derive(Debug, Default)]
pub struct ReadyGate {
    open: AtomicBool,
    notify: Notify,
}

impl ReadyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate and wake everyone currently waiting.
    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Wait until the gate opens, or fail with [`Cancelled`] if `cancel`
    /// fires first. Returns immediately when the gate is already open.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            // Register interest *before* checking the flag, otherwise an
            // `open()` landing between the check and the await is lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_open() {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = &mut notified => {},
            }
        }
    }
}
