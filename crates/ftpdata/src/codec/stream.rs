//! STREAM mode. FILE structure is the raw bytes; RECORD structure escapes
//! `0xFF` and uses two-byte control sequences for end of record and file.

use super::RECORD_ESCAPE;
use crate::block::{Content, DataBlock, Descriptor};
use crate::buffer::FrameBuffer;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

const CONTROL_EOR: u8 = 0x01;
const CONTROL_EOF: u8 = 0x02;
const CONTROL_EOR_EOF: u8 = 0x03;

pub(super) fn decode_file(buf: &mut FrameBuffer) -> Option<DataBlock> {
    (!buf.is_empty()).then(|| DataBlock::data(buf.take_all()))
}

pub(super) fn encode_file(block: &DataBlock) -> Option<Bytes> {
    let payload = block.payload();
    (!payload.is_empty()).then(|| payload.clone())
}

pub(super) fn encode_record(block: &DataBlock) -> Option<Bytes> {
    let payload = block.payload();
    let mut out = BytesMut::with_capacity(payload.len() + 2);
    for &byte in payload.iter() {
        if byte == RECORD_ESCAPE {
            out.put_u8(RECORD_ESCAPE);
        }
        out.put_u8(byte);
    }
    let control = match (block.is_eor(), block.is_eof()) {
        (true, true) => Some(CONTROL_EOR_EOF),
        (true, false) => Some(CONTROL_EOR),
        (false, true) => Some(CONTROL_EOF),
        (false, false) => None,
    };
    if let Some(control) = control {
        out.put_slice(&[RECORD_ESCAPE, control]);
    }
    (!out.is_empty()).then(|| out.freeze())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum RecordState {
    #[default]
    Idle,
    /// Saw `0xFF` as the last byte of the previous chunk.
    InEscape,
}

#[derive(Debug, Default)]
pub(super) struct RecordDecoder {
    state: RecordState,
}

impl RecordDecoder {
    pub(super) fn in_escape(&self) -> bool {
        self.state == RecordState::InEscape
    }

    /// Consume bytes up to and including the first control sequence. Bytes
    /// after it stay in `buf` for the next record.
    ///
    /// An escape followed by anything other than `0xFF`, `0x01`, `0x02` or
    /// `0x03` is dropped with a warning and does not end the record; the
    /// bytes around it stay in the same block.
    pub(super) fn decode(&mut self, buf: &mut FrameBuffer) -> Option<DataBlock> {
        let mut data = BytesMut::with_capacity(buf.remaining());
        let mut flags = 0;
        while let Some(byte) = buf.read_u8() {
            match (self.state, byte) {
                (RecordState::Idle, RECORD_ESCAPE) => self.state = RecordState::InEscape,
                (RecordState::Idle, byte) => data.put_u8(byte),
                (RecordState::InEscape, byte) => {
                    self.state = RecordState::Idle;
                    match byte {
                        RECORD_ESCAPE => data.put_u8(RECORD_ESCAPE),
                        CONTROL_EOR => flags = Descriptor::EOR,
                        CONTROL_EOF => flags = Descriptor::EOF,
                        CONTROL_EOR_EOF => flags = Descriptor::EOR | Descriptor::EOF,
                        other => warn!(control = other, "Ignoring unknown record control byte"),
                    }
                },
            }
            if flags != 0 {
                break;
            }
        }
        if data.is_empty() && flags == 0 {
            return None;
        }
        Some(DataBlock::from_parts(Descriptor::from_bits(flags), Content::Data(data.freeze())))
    }
}
