use std::{num::NonZeroUsize, time::Duration};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::{Error, Result, metrics::METRICS};

/// A lazy, finite, single-pass sequence of chunks read from `R`.
///
/// Every chunk is non-empty and at most `chunk_size` bytes. Chunks come in file order and
/// are handed out as slices of one reusable buffer, so each one has to be consumed before
/// asking for the next. After the end of the stream `next_chunk` keeps returning `None`.
pub struct ChunkStream<R> {
    reader: R,
    buf: Box<[u8]>,
    chunk_timeout: Option<Duration>,
    bytes_read: u64,
    chunks_read: u64,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ChunkStream<R> {
    pub fn new(reader: R, chunk_size: NonZeroUsize, chunk_timeout: Option<Duration>) -> Self {
        Self {
            reader,
            buf: vec![0u8; chunk_size.get()].into_boxed_slice(),
            chunk_timeout,
            bytes_read: 0,
            chunks_read: 0,
            eof: false,
        }
    }

    pub async fn next_chunk(&mut self) -> Result<Option<&[u8]>> {
        if self.eof {
            return Ok(None);
        }

        let offset = self.bytes_read;
        let read = self.reader.read(&mut self.buf[..]);
        let res = match self.chunk_timeout {
            Some(t) => tokio::time::timeout(t, read)
                .await
                .map_err(|_| Error::ChunkTimeout { offset })?,
            None => read.await,
        };
        let len = res.map_err(|source| Error::Read { offset, source })?;

        if len == 0 {
            trace!(
                chunks = self.chunks_read,
                bytes = self.bytes_read,
                "end of stream"
            );
            self.eof = true;
            return Ok(None);
        }

        self.bytes_read += len as u64;
        self.chunks_read += 1;
        METRICS.chunks_read.increment(1);
        METRICS.bytes_read.increment(len as u64);
        Ok(Some(&self.buf[..len]))
    }

    /// Total bytes yielded so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn chunks_read(&self) -> u64 {
        self.chunks_read
    }

    pub fn is_finished(&self) -> bool {
        self.eof
    }
}
