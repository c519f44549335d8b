use super::{ByteStream, StorageStream};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use futures::StreamExt;

/// Seekable, read-only view over a forward-only source.
///
/// Bytes pulled from the source are kept in a scratch buffer. The buffer only
/// grows: its length is the high-water mark of everything read so far, so any
/// offset below it can be re-read without touching the source again. Reads
/// past the mark pull chunks until the requested range is covered or the
/// source ends.
pub struct NonSeekableReadStream {
    source: ByteStream,
    exhausted: bool,
    scratch: Vec<u8>,
    position: u64,
    size: u64,
}

impl NonSeekableReadStream {
    /// `size` is the declared total length of the source.
    pub fn new(source: ByteStream, size: u64) -> Self {
        Self {
            source,
            exhausted: false,
            scratch: Vec::new(),
            position: 0,
            size,
        }
    }

    pub fn high_water_mark(&self) -> u64 {
        self.scratch.len() as u64
    }

    async fn fill_to(&mut self, end: u64) -> StorageResult<()> {
        while self.high_water_mark() < end && !self.exhausted {
            match self.source.next().await {
                Some(Ok(chunk)) => self.scratch.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.exhausted = true,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageStream for NonSeekableReadStream {
    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        false
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let end = self.position.saturating_add(buf.len() as u64);
        self.fill_to(end).await?;

        let available = self.high_water_mark();
        if self.position >= available {
            return Ok(0);
        }
        let start = self.position as usize;
        let n = buf.len().min(available as usize - start);
        buf[..n].copy_from_slice(&self.scratch[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }

    async fn write(&mut self, _buf: &[u8]) -> StorageResult<usize> {
        Err(StorageError::NotSupported("read-only stream".into()))
    }

    async fn seek(&mut self, position: u64) -> StorageResult<()> {
        self.position = position;
        Ok(())
    }

    async fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        self.source = Box::pin(futures::stream::empty());
        self.exhausted = true;
        Ok(())
    }
}
