//! Channels between producer/consumer tasks and async streams.
//!
//! Codec and client libraries often expose blocking `Read`/`Write` handles or
//! futures that own a connection. These helpers run such code on its own task
//! and expose it as a [`ByteStream`] or a [`ByteSink`], with a bounded
//! channel in between so neither side buffers more than a few chunks.

use super::{ByteSink, ByteStream};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::io::{Read, Write};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CHANNEL_DEPTH: usize = 4;

/// Producer half of a source channel
#[derive(Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<StorageResult<Bytes>>,
    abort: CancellationToken,
    chunk_size: usize,
}

impl ChunkSender {
    /// True once the consumer has gone away or the abort token fired
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled() || self.tx.is_closed()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Send from a blocking thread.
    pub fn blocking_send(&self, chunk: Bytes) -> StorageResult<()> {
        if self.abort.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        self.tx.blocking_send(Ok(chunk)).map_err(|_| StorageError::Cancelled)
    }

    /// Send from an async task.
    pub async fn send(&self, chunk: Bytes) -> StorageResult<()> {
        tokio::select! {
            biased;
            _ = self.abort.cancelled() => Err(StorageError::Cancelled),
            sent = self.tx.send(Ok(chunk)) => sent.map_err(|_| StorageError::Cancelled),
        }
    }

    /// Copy `reader` to the channel in `chunk_size` pieces from a blocking thread.
    pub fn copy_from<R: Read + ?Sized>(&self, reader: &mut R) -> StorageResult<u64> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            if self.abort.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.blocking_send(Bytes::copy_from_slice(&buf[..n]))?;
            total += n as u64;
        }
    }

    fn blocking_fail(&self, err: StorageError) {
        if !matches!(err, StorageError::Cancelled) {
            let _ = self.tx.blocking_send(Err(err));
        }
    }

    async fn fail(&self, err: StorageError) {
        if !matches!(err, StorageError::Cancelled) {
            let _ = self.tx.send(Err(err)).await;
        }
    }
}

fn source_channel(chunk_size: usize) -> (ChunkSender, ByteStream, CancellationToken) {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let abort = CancellationToken::new();
    let sender = ChunkSender {
        tx,
        abort: abort.clone(),
        chunk_size: chunk_size.max(1),
    };
    let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
    (sender, Box::pin(stream), abort)
}

/// Run a blocking producer on the blocking pool. Cancelling the returned
/// token stops it between chunks.
pub fn spawn_blocking_source<F>(chunk_size: usize, produce: F) -> (ByteStream, CancellationToken)
where
    F: FnOnce(&ChunkSender) -> StorageResult<()> + Send + 'static,
{
    let (sender, stream, abort) = source_channel(chunk_size);
    tokio::task::spawn_blocking(move || {
        if let Err(err) = produce(&sender) {
            sender.blocking_fail(err);
        }
    });
    (stream, abort)
}

/// Run an async producer on its own task.
pub fn spawn_source<F, Fut>(chunk_size: usize, produce: F) -> (ByteStream, CancellationToken)
where
    F: FnOnce(ChunkSender) -> Fut,
    Fut: Future<Output = StorageResult<()>> + Send + 'static,
{
    let (sender, stream, abort) = source_channel(chunk_size);
    let failures = sender.clone();
    let producer = produce(sender);
    tokio::spawn(async move {
        if let Err(err) = producer.await {
            failures.fail(err).await;
        }
    });
    (stream, abort)
}

enum SinkMessage {
    Chunk(Bytes),
    Finish,
}

/// Consumer half of a sink channel
pub struct ChunkReceiver {
    rx: mpsc::Receiver<SinkMessage>,
}

impl ChunkReceiver {
    /// Next chunk, `None` at a clean end of data, `Cancelled` if the writer
    /// was dropped without finishing.
    pub fn blocking_next(&mut self) -> StorageResult<Option<Bytes>> {
        match self.rx.blocking_recv() {
            Some(SinkMessage::Chunk(chunk)) => Ok(Some(chunk)),
            Some(SinkMessage::Finish) => Ok(None),
            None => Err(StorageError::Cancelled),
        }
    }

    pub async fn next(&mut self) -> StorageResult<Option<Bytes>> {
        match self.rx.recv().await {
            Some(SinkMessage::Chunk(chunk)) => Ok(Some(chunk)),
            Some(SinkMessage::Finish) => Ok(None),
            None => Err(StorageError::Cancelled),
        }
    }

    pub fn copy_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> StorageResult<u64> {
        let mut total = 0u64;
        while let Some(chunk) = self.blocking_next()? {
            writer.write_all(&chunk)?;
            total += chunk.len() as u64;
        }
        Ok(total)
    }

    /// Async view of the incoming chunks. An abandoned writer surfaces as a
    /// trailing `Cancelled` error.
    pub fn into_stream(self) -> ByteStream {
        let stream = futures::stream::unfold(Some(self), |state| async move {
            let mut receiver = state?;
            match receiver.next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(receiver))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        });
        Box::pin(stream)
    }
}

struct ChannelSink {
    tx: Option<mpsc::Sender<SinkMessage>>,
    task: Option<JoinHandle<StorageResult<()>>>,
}

impl ChannelSink {
    fn start(task: impl FnOnce(ChunkReceiver) -> JoinHandle<StorageResult<()>>) -> Box<dyn ByteSink> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let handle = task(ChunkReceiver { rx });
        Box::new(ChannelSink {
            tx: Some(tx),
            task: Some(handle),
        })
    }

    async fn join(&mut self) -> StorageResult<()> {
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ByteSink for ChannelSink {
    async fn send(&mut self, chunk: Bytes) -> StorageResult<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(StorageError::IoFailure("sink already closed".into()));
        };
        if tx.send(SinkMessage::Chunk(chunk)).await.is_ok() {
            return Ok(());
        }
        self.tx = None;
        Err(match self.join().await {
            Err(err) => err,
            Ok(()) => StorageError::IoFailure("consumer stopped before end of data".into()),
        })
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<()> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(SinkMessage::Finish).await;
        }
        self.join().await
    }
}

/// Run a blocking consumer on the blocking pool.
pub fn spawn_blocking_sink<F>(consume: F) -> Box<dyn ByteSink>
where
    F: FnOnce(ChunkReceiver) -> StorageResult<()> + Send + 'static,
{
    ChannelSink::start(|receiver| tokio::task::spawn_blocking(move || consume(receiver)))
}

/// Run an async consumer on its own task.
pub fn spawn_sink<F, Fut>(consume: F) -> Box<dyn ByteSink>
where
    F: FnOnce(ChunkReceiver) -> Fut,
    Fut: Future<Output = StorageResult<()>> + Send + 'static,
{
    ChannelSink::start(|receiver| tokio::spawn(consume(receiver)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    async fn collect(mut stream: ByteStream) -> StorageResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_blocking_source_chunks_reader() {
        let (stream, _abort) = spawn_blocking_source(3, |sender| {
            let mut reader = Cursor::new(b"abcdefgh".to_vec());
            sender.copy_from(&mut reader).map(|_| ())
        });
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 3);
        let body: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect();
        assert_eq!(body, b"abcdefgh");
    }

    #[tokio::test]
    async fn test_blocking_source_forwards_errors() {
        let (stream, _abort) =
            spawn_blocking_source(8, |_| Err(StorageError::NotFound("docs/b.txt".into())));
        let err = collect(stream).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_abort_stops_endless_producer() {
        let (tx, rx) = oneshot::channel();
        let (mut stream, abort) = spawn_blocking_source(4, move |sender| {
            let result = sender.copy_from(&mut std::io::repeat(7));
            let _ = tx.send(matches!(result, Err(StorageError::Cancelled)));
            result.map(|_| ())
        });

        assert!(stream.next().await.is_some());
        abort.cancel();
        while stream.next().await.is_some() {}
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_async_source() {
        let (stream, _abort) = spawn_source(8, |sender| async move {
            for part in ["hel", "lo"] {
                sender.send(Bytes::from_static(part.as_bytes())).await?;
            }
            Ok(())
        });
        assert_eq!(collect(stream).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_blocking_sink_receives_everything() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let target = written.clone();
        let mut sink = spawn_blocking_sink(move |mut receiver| {
            let mut out = Vec::new();
            receiver.copy_to(&mut out)?;
            *target.lock().unwrap() = out;
            Ok(())
        });

        sink.send(Bytes::from_static(b"abc")).await.unwrap();
        sink.send(Bytes::from_static(b"def")).await.unwrap();
        sink.finish().await.unwrap();
        assert_eq!(&*written.lock().unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_dropped_sink_is_reported_as_cancelled() {
        let (tx, rx) = oneshot::channel();
        let mut sink = spawn_blocking_sink(move |mut receiver| {
            let result = receiver.copy_to(&mut Vec::new());
            let _ = tx.send(matches!(result, Err(StorageError::Cancelled)));
            result.map(|_| ())
        });
        sink.send(Bytes::from_static(b"partial")).await.unwrap();
        drop(sink);
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_consumer_failure_surfaces_on_send_or_finish() {
        let mut sink = spawn_sink(|_receiver| async { Err(StorageError::Unavailable("closed".into())) });
        let mut outcome = Ok(());
        for _ in 0..(CHANNEL_DEPTH + 2) {
            if let Err(e) = sink.send(Bytes::from_static(b"x")).await {
                outcome = Err(e);
                break;
            }
        }
        let outcome = match outcome {
            Ok(()) => sink.finish().await,
            Err(e) => Err(e),
        };
        assert!(matches!(outcome, Err(StorageError::Unavailable(_))));
    }
}
