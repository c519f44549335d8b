use super::{ByteSink, StorageStream};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

/// Receives the complete buffered body when a deferred write is committed
pub type CommitFn = Box<dyn FnOnce(Bytes) -> BoxFuture<'static, StorageResult<()>> + Send>;

/// Largest body a deferred write will buffer.
pub const MAX_DEFERRED_BODY: u64 = u32::MAX as u64;

fn past_limit(position: u64) -> StorageError {
    StorageError::from(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("deferred write past {MAX_DEFERRED_BODY} bytes (at {position})"),
    ))
}

/// Write stream that buffers the whole body in memory and hands it to a
/// commit callback on the first `flush` (or `close`).
///
/// Later flushes are no-ops. Dropping the stream without flushing commits
/// nothing.
pub struct DeferredFlushWriteStream {
    buffer: Vec<u8>,
    position: u64,
    committed_size: Option<u64>,
    commit: Option<CommitFn>,
}

impl DeferredFlushWriteStream {
    pub fn new(commit: CommitFn) -> Self {
        Self::with_initial(Vec::new(), commit)
    }

    /// Start from existing content; writes overlay it.
    pub fn with_initial(initial: Vec<u8>, commit: CommitFn) -> Self {
        Self {
            buffer: initial,
            position: 0,
            committed_size: None,
            commit: Some(commit),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed_size.is_some()
    }
}

#[async_trait]
impl StorageStream for DeferredFlushWriteStream {
    fn can_read(&self) -> bool {
        false
    }

    fn can_write(&self) -> bool {
        !self.is_committed()
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.committed_size.unwrap_or(self.buffer.len() as u64)
    }

    async fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        if self.is_committed() {
            return Err(StorageError::NotSupported("write after commit".into()));
        }
        let end = self
            .position
            .checked_add(buf.len() as u64)
            .filter(|end| *end <= MAX_DEFERRED_BODY)
            .ok_or_else(|| past_limit(self.position))?;
        // Both fit in usize once under the limit.
        let (start, end) = (self.position as usize, end as usize);
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[start..end].copy_from_slice(buf);
        self.position = end as u64;
        Ok(buf.len())
    }

    async fn seek(&mut self, position: u64) -> StorageResult<()> {
        if position > MAX_DEFERRED_BODY {
            return Err(past_limit(position));
        }
        self.position = position;
        Ok(())
    }

    async fn flush(&mut self) -> StorageResult<()> {
        let Some(commit) = self.commit.take() else {
            return Ok(());
        };
        let body = Bytes::from(std::mem::take(&mut self.buffer));
        self.committed_size = Some(body.len() as u64);
        commit(body).await
    }
}

/// Write-only stream over a [`ByteSink`]. Position only moves forward.
pub struct ForwardWriteStream {
    sink: Option<Box<dyn ByteSink>>,
    written: u64,
}

impl ForwardWriteStream {
    pub fn new(sink: Box<dyn ByteSink>) -> Self {
        Self { sink: Some(sink), written: 0 }
    }
}

#[async_trait]
impl StorageStream for ForwardWriteStream {
    fn can_read(&self) -> bool {
        false
    }

    fn can_write(&self) -> bool {
        self.sink.is_some()
    }

    fn position(&self) -> u64 {
        self.written
    }

    fn size(&self) -> u64 {
        self.written
    }

    async fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| StorageError::NotSupported("write after close".into()))?;
        sink.send(Bytes::copy_from_slice(buf)).await?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    async fn seek(&mut self, position: u64) -> StorageResult<()> {
        if position == self.written {
            Ok(())
        } else {
            Err(StorageError::NotSupported("forward-only stream cannot seek".into()))
        }
    }

    async fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        match self.sink.take() {
            Some(sink) => sink.finish().await,
            None => Ok(()),
        }
    }
}
