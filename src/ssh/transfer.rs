// ABOUTME: Chunked byte transfer used by uploads over the command channel.
// ABOUTME: Reads a source in fixed-size chunks and hands them to a sink in order.

use super::error::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of each chunk written to the remote receiver.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Destination for transferred chunks.
#[async_trait]
pub trait ChunkSink: Send {
    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<()>;
}

/// Stream everything from `reader` into `sink`. Every chunk except the last
/// is exactly `CHUNK_SIZE` bytes. Returns the total number of bytes sent.
pub async fn stream_chunks<R, S>(reader: &mut R, sink: &mut S) -> Result<u64>
where
    R: AsyncRead + Unpin + Send + ?Sized,
    S: ChunkSink + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let filled = fill(reader, &mut buf).await?;
        if filled == 0 {
            break;
        }
        sink.send_chunk(&buf[..filled]).await?;
        total += filled as u64;
        if filled < CHUNK_SIZE {
            break;
        }
    }

    Ok(total)
}

/// Read until `buf` is full or the reader is exhausted.
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
