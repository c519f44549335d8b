//! Streams handed out by storage items
//!
//! Every open read or write is a [`StreamSession`]: a single-owner handle over
//! some [`StorageStream`] implementation, plus an optional dispose callback
//! that releases the underlying connection or container handle exactly once.

pub mod bridge;
mod content;
mod read;
mod write;

pub use content::{ContentTypedStream, DEFAULT_CONTENT_TYPE};
pub use read::NonSeekableReadStream;
pub use write::{CommitFn, DeferredFlushWriteStream, ForwardWriteStream, MAX_DEFERRED_BODY};

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Forward-only stream of chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Forward-only chunk consumer
#[async_trait]
pub trait ByteSink: Send {
    async fn send(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Signal end of data and wait for the consumer to finish.
    async fn finish(self: Box<Self>) -> StorageResult<()>;
}

/// Random-access stream contract shared by every backend
#[async_trait]
pub trait StorageStream: Send {
    fn can_read(&self) -> bool;

    fn can_write(&self) -> bool;

    fn position(&self) -> u64;

    fn size(&self) -> u64;

    async fn read(&mut self, _buf: &mut [u8]) -> StorageResult<usize> {
        Err(StorageError::NotSupported("stream is not readable".into()))
    }

    async fn write(&mut self, _buf: &[u8]) -> StorageResult<usize> {
        Err(StorageError::NotSupported("stream is not writable".into()))
    }

    async fn seek(&mut self, position: u64) -> StorageResult<()>;

    async fn flush(&mut self) -> StorageResult<()>;

    async fn close(&mut self) -> StorageResult<()> {
        self.flush().await
    }

    async fn read_to_end(&mut self) -> StorageResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    async fn write_all(&mut self, mut data: &[u8]) -> StorageResult<()> {
        while !data.is_empty() {
            let n = self.write(data).await?;
            if n == 0 {
                return Err(StorageError::IoFailure("stream accepted no bytes".into()));
            }
            data = &data[n..];
        }
        Ok(())
    }
}

pub type DisposeCallback = Box<dyn FnOnce() + Send>;

/// Single-owner handle over an open stream
pub struct StreamSession {
    inner: Box<dyn StorageStream>,
    on_dispose: Option<DisposeCallback>,
}

impl StreamSession {
    pub fn new(inner: impl StorageStream + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            on_dispose: None,
        }
    }

    /// Run `callback` once, on close or drop, whichever comes first.
    pub fn with_dispose(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_dispose = Some(Box::new(callback));
        self
    }

    fn dispose(&mut self) {
        if let Some(callback) = self.on_dispose.take() {
            callback();
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("position", &self.inner.position())
            .field("size", &self.inner.size())
            .field("can_read", &self.inner.can_read())
            .field("can_write", &self.inner.can_write())
            .finish()
    }
}

#[async_trait]
impl StorageStream for StreamSession {
    fn can_read(&self) -> bool {
        self.inner.can_read()
    }

    fn can_write(&self) -> bool {
        self.inner.can_write()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    async fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        self.inner.read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        self.inner.write(buf).await
    }

    async fn seek(&mut self, position: u64) -> StorageResult<()> {
        self.inner.seek(position).await
    }

    async fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush().await
    }

    async fn close(&mut self) -> StorageResult<()> {
        let result = self.inner.close().await;
        self.dispose();
        result
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
