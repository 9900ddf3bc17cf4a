//! Async primitives shared between the data channel and the monitor.
//!
//! - [`ReadyGate`] is a one-shot readiness latch: waiters park until some
//!   other party calls [`ReadyGate::open`], and every wait after that returns
//!   immediately. Waiting is cancellable.
//! - [`Backoff`] and [`retry`] replace "sleep in a loop until something shows
//!   up" with a bounded, cancellable retry schedule.

mod backoff;
mod gate;

pub use crate::backoff::{Backoff, RetryError, retry};
pub use crate::gate::{Cancelled, ReadyGate};
pub use tokio_util::sync::CancellationToken;
