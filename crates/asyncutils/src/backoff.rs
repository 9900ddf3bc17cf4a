use derive_more::Display;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exponential backoff schedule with a hard cap on the number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the second attempt (the first one runs immediately).
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Multiplier applied after every failed attempt.
    pub factor: u32,
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: usize,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            factor: 2,
            attempts: 5,
        }
    }
}

impl Backoff {
    /// A schedule that waits the same `delay` between each of `attempts`.
    pub fn fixed(delay: Duration, attempts: usize) -> Self {
        Self { initial: delay, max: delay, factor: 1, attempts }
    }

    /// Delays to sleep between consecutive attempts (`attempts - 1` items).
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut next = self.initial.min(self.max);
        (1..self.attempts.max(1)).map(move |_| {
            let current = next;
            next = next.saturating_mul(self.factor.max(1)).min(self.max);
            current
        })
    }

    /// Sum of every delay in the schedule; the longest `retry` can sleep.
    pub fn total_delay(&self) -> Duration {
        self.delays().fold(Duration::ZERO, Duration::saturating_add)
    }
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The cancellation token fired between attempts.
    #[display("retry cancelled")]
    Cancelled,
    /// Every attempt failed; carries the last error.
    #[display("retry attempts exhausted")]
    Exhausted(E),
}
impl<E: Debug> std::error::Error for RetryError<E> {}

/// Run `op` until it succeeds, the schedule runs out, or `cancel` fires.
///
/// `op` receives the zero-based attempt number.
pub async fn retry<T, E, F, Fut>(backoff: &Backoff, cancel: &CancellationToken, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delays = backoff.delays();
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let Some(delay) = delays.next() else {
            return Err(RetryError::Exhausted(err));
        };
        sleep_or_cancel(delay, cancel).await?;
        attempt += 1;
    }
}

async fn sleep_or_cancel<E>(delay: Duration, cancel: &CancellationToken) -> Result<(), RetryError<E>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RetryError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
