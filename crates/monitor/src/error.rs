//! Monitor Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A monitor error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// None of these stop a running monitor on their own: per-file and
/// per-directory failures are logged and retried on the next cycle.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reading file metadata or contents failed.
    #[display("I/O error")]
    Io,
    /// Computing a content digest failed.
    #[display("could not compute digest")]
    Digest,
    /// A monitored directory could not be listed.
    #[display("could not list directory: {}", _0.display())]
    Listing(#[error(not(source))] PathBuf),
    /// Reading or writing the checkpoint failed.
    #[display("checkpoint I/O failed")]
    Checkpoint,
    /// Another monitor keeps the liveness marker of this checkpoint fresh.
    #[display("another monitor is already using {}", _0.display())]
    AlreadyRunning(#[error(not(source))] PathBuf),
    /// The file filter could not be built.
    #[display("invalid file filter: {_0}")]
    InvalidFilter(#[error(not(source))] String),
    /// A dispatched command panicked or was aborted.
    #[display("command did not complete")]
    Command,
    /// The monitor was stopped before the operation completed.
    #[display("monitor stopped")]
    Stopped,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Digest | Self::Listing(_) | Self::Checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Listing(PathBuf::from("/in")), "could not list directory: /in", true)]
    #[case(ErrorKind::AlreadyRunning(PathBuf::from("/var/status.json")), "another monitor is already using /var/status.json", false)]
    #[case(ErrorKind::InvalidFilter("(".to_string()), "invalid file filter: (", false)]
    #[case(ErrorKind::Checkpoint, "checkpoint I/O failed", true)]
    #[case(ErrorKind::Stopped, "monitor stopped", false)]
    fn test_error_kind(#[case] kind: ErrorKind, #[case] display: &str, #[case] retryable: bool) {
        assert_eq!(kind.to_string(), display);
        assert_eq!(kind.is_retryable(), retryable);
    }
}
