use super::{StorageStream, StreamSession};
use crate::error::StorageResult;
use async_trait::async_trait;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A stream session paired with the MIME type of its content
#[derive(Debug)]
pub struct ContentTypedStream {
    inner: StreamSession,
    content_type: String,
}

impl ContentTypedStream {
    pub fn new(inner: StreamSession, content_type: impl Into<String>) -> Self {
        Self {
            inner,
            content_type: content_type.into(),
        }
    }

    pub fn octet_stream(inner: StreamSession) -> Self {
        Self::new(inner, DEFAULT_CONTENT_TYPE)
    }

    /// Guess the MIME type from the item name's extension.
    pub fn for_name(inner: StreamSession, name: &str) -> Self {
        let content_type = mime_guess::from_path(name).first_or_octet_stream();
        Self::new(inner, content_type.essence_str())
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn into_inner(self) -> StreamSession {
        self.inner
    }
}

#[async_trait]
impl StorageStream for ContentTypedStream {
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
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ByteStream, NonSeekableReadStream};
    use bytes::Bytes;

    fn session(body: &'static [u8]) -> StreamSession {
        let source: ByteStream = Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(body))]));
        StreamSession::new(NonSeekableReadStream::new(source, body.len() as u64))
    }

    #[test]
    fn test_content_type_from_name() {
        assert_eq!(ContentTypedStream::for_name(session(b""), "a.txt").content_type(), "text/plain");
        assert_eq!(ContentTypedStream::for_name(session(b""), "lib.zip").content_type(), "application/zip");
        assert_eq!(
            ContentTypedStream::for_name(session(b""), "blob.unknownext").content_type(),
            DEFAULT_CONTENT_TYPE
        );
        assert_eq!(ContentTypedStream::octet_stream(session(b"")).content_type(), DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_delegates_to_inner() {
        let mut stream = ContentTypedStream::new(session(b"hi"), "text/plain");
        assert!(stream.can_read());
        assert_eq!(stream.size(), 2);
        assert_eq!(stream.read_to_end().await.unwrap(), b"hi");
        assert_eq!(stream.position(), 2);
        stream.close().await.unwrap();
    }
}
