//! FTP data-channel framing (RFC 959 §3.4).
//!
//! Turns the bytes of an FTP data connection into [`DataBlock`]s and back,
//! according to the negotiated transfer mode and file structure:
//!
//! - **STREAM / FILE**: bytes pass through untouched; end of file is the
//!   connection closing.
//! - **STREAM / RECORD**: `0xFF` is escaped as `0xFF 0xFF`; `0xFF 0x01`,
//!   `0xFF 0x02` and `0xFF 0x03` mark end of record, end of file, or both.
//! - **BLOCK**: every block is a 3-byte header (descriptor, big-endian
//!   length) followed by its payload. Restart markers are only expressible
//!   here.
//!
//! COMPRESSED mode and PAGE structure are recognised by the parsers but
//! rejected by [`ModeCodec`].
//!
//! The synchronous [`ModeCodec`] works on a [`FrameBuffer`]; [`DataChannel`]
//! drives it over any Tokio `AsyncRead`/`AsyncWrite` pair. Both can be tied
//! to a [`ReadyGate`](drover_asyncutils::ReadyGate) so nothing touches the
//! connection before its owner has finished configuring it.

pub mod block;
pub mod buffer;
mod channel;
pub mod codec;
pub mod error;
mod mode;

pub use crate::block::{Content, DataBlock, Descriptor};
pub use crate::buffer::{BlockHeader, FrameBuffer};
pub use crate::channel::{ChannelStats, DataChannel};
pub use crate::codec::{ModeCodec, PendingBlock};
pub use crate::mode::{TransferMode, TransferStructure};
