use crate::error::{ErrorKind, Result};
use bytes::BytesMut;
use drover_ftpdata::{DataBlock, DataChannel, ModeCodec, TransferStructure};
use exn::ResultExt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

const CHUNK: usize = 64 * 1024;

/// Frame the contents of `input` and write the wire bytes to `output`.
///
/// With RECORD structure every line of the input becomes one record.
pub async fn encode(codec: ModeCodec, input: &Path, output: &Path) -> Result<()> {
    let source = File::open(input).await.or_raise(|| ErrorKind::Io(input.to_path_buf()))?;
    let sink = File::create(output).await.or_raise(|| ErrorKind::Io(output.to_path_buf()))?;
    let record = codec.structure() == TransferStructure::Record;
    let mut channel = DataChannel::new(tokio::io::empty(), sink, codec);

    if record {
        let mut lines = BufReader::new(source).split(b'\n');
        while let Some(line) = lines.next_segment().await.or_raise(|| ErrorKind::Io(input.to_path_buf()))? {
            channel.write_block(DataBlock::data(line).with_eor()).await.or_raise(|| ErrorKind::Frame)?;
        }
    } else {
        let mut source = source;
        loop {
            let mut chunk = BytesMut::with_capacity(CHUNK);
            let read = (&mut source)
                .take(CHUNK as u64)
                .read_buf(&mut chunk)
                .await
                .or_raise(|| ErrorKind::Io(input.to_path_buf()))?;
            if read == 0 {
                break;
            }
            channel.write_block(DataBlock::data(chunk.freeze())).await.or_raise(|| ErrorKind::Frame)?;
        }
    }
    channel.write_block(DataBlock::eof()).await.or_raise(|| ErrorKind::Frame)?;
    let stats = channel.stats();
    // STREAM/FILE already closed the sink when it wrote EOF.
    let (_, mut sink) = channel.into_parts();
    sink.flush().await.or_raise(|| ErrorKind::Io(output.to_path_buf()))?;
    info!(blocks = stats.blocks_out, bytes = stats.bytes_out, "Encoded");
    Ok(())
}

/// Read framed bytes from `input` and write the carried data to `output`.
///
/// With RECORD structure each end of record becomes a newline.
pub async fn decode(codec: ModeCodec, input: &Path, output: &Path) -> Result<()> {
    let source = File::open(input).await.or_raise(|| ErrorKind::Io(input.to_path_buf()))?;
    let mut sink = File::create(output).await.or_raise(|| ErrorKind::Io(output.to_path_buf()))?;
    let record = codec.structure() == TransferStructure::Record;
    let mut channel = DataChannel::new(source, tokio::io::sink(), codec);

    while let Some(block) = channel.read_block().await.or_raise(|| ErrorKind::Frame)? {
        if let Some(markers) = block.markers() {
            info!(marker = %String::from_utf8_lossy(markers), "Restart marker");
            continue;
        }
        if let Some(data) = block.data_bytes() {
            sink.write_all(data).await.or_raise(|| ErrorKind::Io(output.to_path_buf()))?;
        }
        if record && block.is_eor() {
            sink.write_all(b"\n").await.or_raise(|| ErrorKind::Io(output.to_path_buf()))?;
        }
        if block.is_eof() {
            debug!("End of file");
            break;
        }
    }
    sink.flush().await.or_raise(|| ErrorKind::Io(output.to_path_buf()))?;
    let stats = channel.stats();
    info!(blocks = stats.blocks_in, bytes = stats.bytes_in, "Decoded");
    Ok(())
}
