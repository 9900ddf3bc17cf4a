//! Data Channel Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A data channel error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for data channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// Everything except [`NotReady`](Self::NotReady) and [`Io`](Self::Io) is
/// fatal to the data connection: close it, don't retry.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested transfer mode is not implemented (COMPRESSED, or junk).
    #[display("unsupported transfer mode: {_0}")]
    UnsupportedMode(#[error(not(source))] String),
    /// The requested file structure is not implemented (PAGE, or junk).
    #[display("unsupported transfer structure: {_0}")]
    UnsupportedStructure(#[error(not(source))] String),
    /// A complete frame arrived but violates the framing rules.
    #[display("malformed frame: {_0}")]
    MalformedFrame(#[error(not(source))] &'static str),
    /// The application handed over a block the current mode cannot encode.
    #[display("invalid block: {_0}")]
    InvalidBlock(#[error(not(source))] &'static str),
    /// The connection was never signalled as ready (or the wait was cancelled).
    #[display("data channel not ready")]
    NotReady,
    /// The peer closed the connection in the middle of a frame.
    #[display("data channel closed mid-frame")]
    Closed,
    /// Reading from or writing to the transport failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady | Self::Io)
    }
}
