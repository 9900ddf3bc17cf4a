//! Mode-aware encoding and decoding of [`DataBlock`]s.
//!
//! One [`ModeCodec`] belongs to one data connection. It is not thread-safe
//! and keeps partial-frame state between calls, so feed it every byte the
//! connection receives, in order.

mod block;
mod stream;

use crate::block::DataBlock;
use crate::buffer::FrameBuffer;
use crate::error::{ErrorKind, Result};
use crate::mode::{TransferMode, TransferStructure};
use bytes::{Bytes, BytesMut};
use drover_asyncutils::{CancellationToken, ReadyGate};
use exn::ResultExt;
use std::sync::Arc;

pub use self::block::BlockDecodeState;
use self::block::BlockDecoder;
use self::stream::RecordDecoder;

/// Escape byte for STREAM mode with RECORD structure.
pub const RECORD_ESCAPE: u8 = 0xFF;
/// Largest payload a single BLOCK mode frame can carry.
pub const MAX_BLOCK_PAYLOAD: usize = u16::MAX as usize;

/// A [`DataBlock`] being turned into wire frames.
///
/// BLOCK mode may need several frames for one block; call
/// [`ModeCodec::encode_next`] until it returns `None`.
#[derive(Debug)]
pub struct PendingBlock {
    block: DataBlock,
    offset: usize,
    done: bool,
}

impl PendingBlock {
    pub fn new(block: DataBlock) -> Self {
        Self { block, offset: 0, done: false }
    }

    #[must_use]
    pub fn block(&self) -> &DataBlock {
        &self.block
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl From<DataBlock> for PendingBlock {
    fn from(block: DataBlock) -> Self {
        Self::new(block)
    }
}

#[derive(Debug)]
pub struct ModeCodec {
    mode: TransferMode,
    structure: TransferStructure,
    record: RecordDecoder,
    block: BlockDecoder,
    gate: Option<Arc<ReadyGate>>,
    passed: bool,
}

impl ModeCodec {
    /// Create a codec for an already-configured connection.
    ///
    /// Fails with [`ErrorKind::UnsupportedMode`] for COMPRESSED and
    /// [`ErrorKind::UnsupportedStructure`] for PAGE.
    pub fn new(mode: TransferMode, structure: TransferStructure) -> Result<Self> {
        check_supported(mode, structure)?;
        Ok(Self {
            mode,
            structure,
            record: RecordDecoder::default(),
            block: BlockDecoder::default(),
            gate: None,
            passed: true,
        })
    }

    /// Refuse to encode or decode anything until `gate` opens.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<ReadyGate>) -> Self {
        self.passed = gate.is_open();
        self.gate = Some(gate);
        self
    }

    #[must_use]
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    #[must_use]
    pub fn structure(&self) -> TransferStructure {
        self.structure
    }

    /// Switch mode between transfers. Discards any partial-frame state.
    pub fn set_mode(&mut self, mode: TransferMode) -> Result<()> {
        check_supported(mode, self.structure)?;
        self.mode = mode;
        self.reset();
        Ok(())
    }

    /// Switch structure between transfers. Discards any partial-frame state.
    pub fn set_structure(&mut self, structure: TransferStructure) -> Result<()> {
        check_supported(self.mode, structure)?;
        self.structure = structure;
        self.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.record = RecordDecoder::default();
        self.block = BlockDecoder::default();
    }

    #[must_use]
    pub fn block_state(&self) -> BlockDecodeState {
        self.block.state()
    }

    /// Whether STREAM mode signals end of file by closing the connection.
    #[must_use]
    pub fn closes_on_eof(&self) -> bool {
        self.mode == TransferMode::Stream && self.structure == TransferStructure::File
    }

    /// Wait for the readiness gate. Once this has succeeded it never waits
    /// again; a cancelled wait fails with the retryable
    /// [`ErrorKind::NotReady`].
    pub async fn ready(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.passed {
            return Ok(());
        }
        if let Some(gate) = &self.gate {
            gate.wait(cancel).await.or_raise(|| ErrorKind::NotReady)?;
        }
        self.passed = true;
        Ok(())
    }

    fn ensure_ready(&mut self) -> Result<()> {
        if !self.passed {
            if self.gate.as_ref().is_some_and(|gate| !gate.is_open()) {
                exn::bail!(ErrorKind::NotReady);
            }
            self.passed = true;
        }
        Ok(())
    }

    /// Decode the next block from `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not hold a complete frame yet; any
    /// incomplete frame is left unconsumed for the next call.
    pub fn decode(&mut self, buf: &mut FrameBuffer) -> Result<Option<DataBlock>> {
        self.ensure_ready()?;
        let block = match self.mode {
            TransferMode::Block => self.block.decode(buf),
            TransferMode::Stream => Ok(match self.structure {
                TransferStructure::Record => self.record.decode(buf),
                _ => stream::decode_file(buf),
            }),
            TransferMode::Compressed => Err(exn::Exn::from(ErrorKind::UnsupportedMode(self.mode.to_string()))),
        };
        buf.compact();
        block
    }

    /// The transport closed: flush whatever the mode allows.
    ///
    /// Call once [`decode`](Self::decode) has returned `None` for the final
    /// bytes. STREAM mode with FILE structure yields a final, empty EOF
    /// block since the close itself is the end-of-file signal. Bytes left in
    /// the middle of a frame fail with [`ErrorKind::Closed`].
    pub fn finish(&mut self, buf: &mut FrameBuffer) -> Result<Option<DataBlock>> {
        self.ensure_ready()?;
        match (self.mode, self.structure) {
            (TransferMode::Block, _) => {
                if !buf.is_empty() {
                    exn::bail!(ErrorKind::Closed);
                }
                Ok(None)
            },
            (TransferMode::Stream, TransferStructure::Record) => {
                if self.record.in_escape() {
                    exn::bail!(ErrorKind::Closed);
                }
                Ok(None)
            },
            (TransferMode::Stream, _) => Ok(Some(DataBlock::eof())),
            (TransferMode::Compressed, _) => exn::bail!(ErrorKind::UnsupportedMode(self.mode.to_string())),
        }
    }

    /// Produce the next wire frame for `pending`, or `None` once it is done.
    pub fn encode_next(&mut self, pending: &mut PendingBlock) -> Result<Option<Bytes>> {
        self.ensure_ready()?;
        if pending.done {
            return Ok(None);
        }
        match self.mode {
            TransferMode::Block => block::encode_next(pending),
            TransferMode::Stream => {
                pending.done = true;
                if pending.block.is_restart() {
                    exn::bail!(ErrorKind::InvalidBlock("restart markers need BLOCK mode"));
                }
                Ok(match self.structure {
                    TransferStructure::Record => stream::encode_record(&pending.block),
                    _ => stream::encode_file(&pending.block),
                })
            },
            TransferMode::Compressed => exn::bail!(ErrorKind::UnsupportedMode(self.mode.to_string())),
        }
    }

    /// Encode a whole block into `dst`.
    pub fn encode(&mut self, block: DataBlock, dst: &mut BytesMut) -> Result<()> {
        let mut pending = PendingBlock::new(block);
        while let Some(frame) = self.encode_next(&mut pending)? {
            dst.extend_from_slice(&frame);
        }
        Ok(())
    }
}

fn check_supported(mode: TransferMode, structure: TransferStructure) -> Result<()> {
    if !mode.is_supported() {
        exn::bail!(ErrorKind::UnsupportedMode(mode.to_string()));
    }
    if !structure.is_supported() {
        exn::bail!(ErrorKind::UnsupportedStructure(structure.to_string()));
    }
    Ok(())
}
