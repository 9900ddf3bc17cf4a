use bytes::{Buf, Bytes, BytesMut};

/// Size of a BLOCK mode header on the wire.
pub const BLOCK_HEADER_LEN: usize = 3;

/// A BLOCK mode header: one descriptor byte, then a big-endian byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub descriptor: u8,
    pub length: u16,
}

impl BlockHeader {
    #[must_use]
    pub fn to_bytes(self) -> [u8; BLOCK_HEADER_LEN] {
        let [hi, lo] = self.length.to_be_bytes();
        [self.descriptor, hi, lo]
    }
}

/// Position in a [`FrameBuffer`] that a partial read can be rewound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

/// Accumulates bytes from the transport until a complete frame is available.
///
/// Reads advance a cursor instead of discarding bytes, so a decoder can take
/// a [`mark`](Self::mark), try to read a whole frame, and
/// [`reset`](Self::reset) if the frame turns out to be incomplete. Consumed
/// bytes are only dropped by [`compact`](Self::compact).
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
    pos: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), pos: 0 }
    }

    /// Append freshly received bytes.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write end of the buffer, for [`AsyncReadExt::read_buf`](tokio::io::AsyncReadExt::read_buf).
    pub fn writable(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[must_use]
    pub fn unread(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    #[must_use]
    pub fn mark(&self) -> Mark {
        Mark(self.pos)
    }

    /// Rewind to `mark`, making everything read since then readable again.
    pub fn reset(&mut self, mark: Mark) {
        debug_assert!(mark.0 <= self.pos, "mark taken before the last compaction");
        self.pos = mark.0.min(self.pos);
    }

    /// Drop everything already consumed. Invalidates outstanding marks.
    pub fn compact(&mut self) {
        self.buf.advance(self.pos);
        self.pos = 0;
    }

    /// Consume a BLOCK header, or leave the buffer untouched and return
    /// `None` when fewer than three bytes are available.
    pub fn try_read_block_header(&mut self) -> Option<BlockHeader> {
        let header = self.peek_block_header()?;
        self.pos += BLOCK_HEADER_LEN;
        Some(header)
    }

    #[must_use]
    pub fn peek_block_header(&self) -> Option<BlockHeader> {
        match *self.unread() {
            [descriptor, hi, lo, ..] => Some(BlockHeader { descriptor, length: u16::from_be_bytes([hi, lo]) }),
            _ => None,
        }
    }

    /// Consume exactly `len` bytes, or nothing at all.
    pub fn try_read_exact(&mut self, len: usize) -> Option<Bytes> {
        if self.remaining() < len {
            return None;
        }
        let bytes = Bytes::copy_from_slice(&self.buf[self.pos..self.pos + len]);
        self.pos += len;
        Some(bytes)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Consume whatever is left.
    pub fn take_all(&mut self) -> Bytes {
        let bytes = Bytes::copy_from_slice(self.unread());
        self.pos = self.buf.len();
        bytes
    }
}
