use crate::block::DataBlock;
use crate::buffer::FrameBuffer;
use crate::codec::{ModeCodec, PendingBlock};
use crate::error::{ErrorKind, Result};
use drover_asyncutils::CancellationToken;
use exn::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, instrument, trace};

const READ_CHUNK: usize = 16 * 1024;

/// Byte counters for one data connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub blocks_in: u64,
    pub blocks_out: u64,
}

/// A data connection speaking one transfer mode.
///
/// Reading and writing both wait for the codec's readiness gate first. The
/// `cancel` token only aborts that wait.
pub struct DataChannel<R, W> {
    reader: R,
    writer: W,
    codec: ModeCodec,
    buffer: FrameBuffer,
    cancel: CancellationToken,
    finished: bool,
    stats: ChannelStats,
}

impl<S: AsyncRead + AsyncWrite> DataChannel<ReadHalf<S>, WriteHalf<S>> {
    /// Wrap a bidirectional stream such as a `TcpStream`.
    pub fn from_stream(stream: S, codec: ModeCodec) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, codec)
    }
}

impl<R, W> DataChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, codec: ModeCodec) -> Self {
        Self {
            reader,
            writer,
            codec,
            buffer: FrameBuffer::with_capacity(READ_CHUNK),
            cancel: CancellationToken::new(),
            finished: false,
            stats: ChannelStats::default(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn codec(&self) -> &ModeCodec {
        &self.codec
    }

    /// Change mode or structure between transfers.
    pub fn codec_mut(&mut self) -> &mut ModeCodec {
        &mut self.codec
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Read the next block, or `None` once the peer has closed and
    /// everything it sent has been handed over.
    #[instrument(level = "debug", skip(self), fields(mode = %self.codec.mode(), structure = %self.codec.structure()))]
    pub async fn read_block(&mut self) -> Result<Option<DataBlock>> {
        if self.finished {
            return Ok(None);
        }
        self.codec.ready(&self.cancel).await?;
        loop {
            if let Some(block) = self.codec.decode(&mut self.buffer)? {
                self.stats.blocks_in += 1;
                trace!(bytes = block.byte_count(), eof = block.is_eof(), "Decoded block");
                return Ok(Some(block));
            }
            let writable = self.buffer.writable();
            writable.reserve(READ_CHUNK);
            let read = self.reader.read_buf(writable).await.or_raise(|| ErrorKind::Io)?;
            if read == 0 {
                debug!(leftover = self.buffer.remaining(), "Peer closed the data connection");
                self.finished = true;
                let last = self.codec.finish(&mut self.buffer)?;
                if last.is_some() {
                    self.stats.blocks_in += 1;
                }
                return Ok(last);
            }
            self.stats.bytes_in += read as u64;
        }
    }

    /// Encode and send one block. In STREAM mode with FILE structure an EOF
    /// block also shuts the write side down, since closing is the only way
    /// to signal end of file there.
    #[instrument(level = "debug", skip(self, block), fields(mode = %self.codec.mode(), bytes = block.byte_count()))]
    pub async fn write_block(&mut self, block: DataBlock) -> Result<()> {
        self.codec.ready(&self.cancel).await?;
        let close = block.is_eof() && self.codec.closes_on_eof();
        let mut pending = PendingBlock::new(block);
        while let Some(frame) = self.codec.encode_next(&mut pending)? {
            self.writer.write_all(&frame).await.or_raise(|| ErrorKind::Io)?;
            self.stats.bytes_out += frame.len() as u64;
        }
        self.stats.blocks_out += 1;
        if close {
            return self.shutdown().await;
        }
        self.writer.flush().await.or_raise(|| ErrorKind::Io)
    }

    /// Flush and close the write side.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.or_raise(|| ErrorKind::Io)
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}
