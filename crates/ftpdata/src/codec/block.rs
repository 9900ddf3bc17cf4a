//! BLOCK mode: `[descriptor][length: u16 BE][payload]` frames.
//!
//! Payloads longer than one frame are split into full-size frames with
//! descriptor 0 followed by a final frame with the real descriptor. The
//! decoder hands every frame over as its own [`DataBlock`]; a flagless
//! full-size frame is indistinguishable from a block that happened to be
//! exactly 65535 bytes, so the concatenated payload and the flags on the
//! last frame are what survive the wire.

use super::{MAX_BLOCK_PAYLOAD, PendingBlock};
use crate::block::{Content, DataBlock, Descriptor};
use crate::buffer::{BLOCK_HEADER_LEN, BlockHeader, FrameBuffer};
use crate::error::{ErrorKind, Result};
use bytes::{BufMut, Bytes, BytesMut};
use exn::ResultExt;
use tracing::trace;

/// Where the BLOCK decoder is between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDecodeState {
    /// Nothing pending.
    AwaitingHeader,
    /// A header arrived but its payload has not; the header is still in the
    /// buffer.
    AwaitingPayload(BlockHeader),
    /// The last `emitted` frames were full-size and flagless, so they are
    /// probably the leading parts of one split block.
    EmittingSubBlocks { emitted: usize },
}

#[derive(Debug, Default)]
pub(super) struct BlockDecoder {
    waiting_on: Option<BlockHeader>,
    sub_blocks: usize,
}

fn is_sub_block(header: BlockHeader) -> bool {
    header.descriptor == 0 && usize::from(header.length) == MAX_BLOCK_PAYLOAD
}

impl BlockDecoder {
    pub(super) fn state(&self) -> BlockDecodeState {
        match self.waiting_on {
            Some(header) => BlockDecodeState::AwaitingPayload(header),
            None if self.sub_blocks > 0 => BlockDecodeState::EmittingSubBlocks { emitted: self.sub_blocks },
            None => BlockDecodeState::AwaitingHeader,
        }
    }

    pub(super) fn decode(&mut self, buf: &mut FrameBuffer) -> Result<Option<DataBlock>> {
        loop {
            let mark = buf.mark();
            let Some(header) = buf.try_read_block_header() else {
                return Ok(None);
            };
            let Some(payload) = buf.try_read_exact(usize::from(header.length)) else {
                buf.reset(mark);
                self.waiting_on = Some(header);
                return Ok(None);
            };
            self.waiting_on = None;

            let descriptor = Descriptor::from_bits(header.descriptor);
            if header.descriptor & Descriptor::RESTART != 0 {
                self.sub_blocks = 0;
                if payload.is_empty() {
                    exn::bail!(ErrorKind::MalformedFrame("empty restart marker"));
                }
                return Ok(Some(DataBlock::from_parts(descriptor, Content::Restart(payload))));
            }
            if payload.is_empty() && !descriptor.is_terminal() {
                // Carries neither bytes nor a boundary.
                continue;
            }
            if is_sub_block(header) {
                self.sub_blocks += 1;
                trace!(emitted = self.sub_blocks, "Full-size flagless frame");
            } else {
                self.sub_blocks = 0;
            }
            return Ok(Some(DataBlock::from_parts(descriptor, Content::Data(payload))));
        }
    }
}

fn frame(descriptor: u8, payload: &[u8]) -> Result<Bytes> {
    let length = u16::try_from(payload.len()).or_raise(|| ErrorKind::InvalidBlock("payload exceeds one frame"))?;
    let mut out = BytesMut::with_capacity(BLOCK_HEADER_LEN + payload.len());
    out.put_slice(&BlockHeader { descriptor, length }.to_bytes());
    out.put_slice(payload);
    Ok(out.freeze())
}

pub(super) fn encode_next(pending: &mut PendingBlock) -> Result<Option<Bytes>> {
    let block = &pending.block;
    let payload = block.payload();

    if block.is_restart() {
        pending.done = true;
        if payload.is_empty() {
            exn::bail!(ErrorKind::InvalidBlock("restart marker without marker bytes"));
        }
        return frame(block.descriptor_byte(), payload).map(Some);
    }

    let remaining = &payload[pending.offset..];
    if remaining.len() > MAX_BLOCK_PAYLOAD {
        let chunk = frame(0, &remaining[..MAX_BLOCK_PAYLOAD])?;
        pending.offset += MAX_BLOCK_PAYLOAD;
        return Ok(Some(chunk));
    }
    pending.done = true;
    if remaining.is_empty() && !block.descriptor().is_terminal() {
        return Ok(None);
    }
    frame(block.descriptor_byte(), remaining).map(Some)
}
