//! `async_ftp` transport (plain FTP only)

use super::client::{Download, FtpConnector, FtpEndpoint, FtpSession};
use async_ftp::types::{FileType, FtpError};
use async_ftp::{status, FtpStream};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use vstore_core::path::ftp::FtpScheme;
use vstore_core::stream::bridge::{spawn_sink, spawn_source};
use vstore_core::stream::ByteSink;
use vstore_core::{StorageError, StorageResult};

/// Reply code of an unexpected server response, as reported by the client
/// (`Expected code [..], got response: 550 ...`).
fn reply_code(description: &str) -> Option<u32> {
    let (_, reply) = description.split_once("got response: ")?;
    reply.get(..3)?.parse().ok()
}

fn ftp_error(err: FtpError) -> StorageError {
    match err {
        FtpError::ConnectionError(e) => StorageError::from(e),
        FtpError::InvalidResponse(description) => match reply_code(&description) {
            Some(status::FILE_UNAVAILABLE) => StorageError::NotFound(description),
            _ => StorageError::IoFailure(description),
        },
        other => StorageError::IoFailure(other.to_string()),
    }
}

#[derive(Debug, Default)]
pub struct AsyncFtpConnector;

#[async_trait]
impl FtpConnector for AsyncFtpConnector {
    async fn connect(&self, endpoint: &FtpEndpoint) -> StorageResult<Box<dyn FtpSession>> {
        if endpoint.scheme != FtpScheme::Ftp {
            return Err(StorageError::NotSupported(format!(
                "{}:// is not supported by this client",
                endpoint.scheme.as_str()
            )));
        }
        let mut stream = FtpStream::connect(endpoint.address()).await.map_err(ftp_error)?;
        stream
            .login(&endpoint.username, &endpoint.password)
            .await
            .map_err(ftp_error)?;
        stream.transfer_type(FileType::Binary).await.map_err(ftp_error)?;
        Ok(Box::new(AsyncFtpSession { stream }))
    }
}

struct AsyncFtpSession {
    stream: FtpStream,
}

#[async_trait]
impl FtpSession for AsyncFtpSession {
    async fn size(&mut self, path: &str) -> StorageResult<Option<u64>> {
        let size = self.stream.size(path).await.map_err(ftp_error)?;
        Ok(size.map(|s| s as u64))
    }

    async fn modified(&mut self, path: &str) -> StorageResult<Option<DateTime<Utc>>> {
        self.stream.mdtm(path).await.map_err(ftp_error)
    }

    async fn directory_exists(&mut self, path: &str) -> StorageResult<bool> {
        match self.stream.cwd(path).await.map_err(ftp_error) {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn rename(&mut self, from: &str, to: &str) -> StorageResult<()> {
        self.stream.rename(from, to).await.map_err(ftp_error)
    }

    async fn delete_file(&mut self, path: &str) -> StorageResult<()> {
        self.stream.rm(path).await.map_err(ftp_error)
    }

    async fn delete_directory(&mut self, path: &str) -> StorageResult<()> {
        self.stream.rmdir(path).await.map_err(ftp_error)
    }

    async fn download(self: Box<Self>, path: &str, chunk_size: usize) -> StorageResult<Download> {
        let mut ftp = self.stream;
        let size = ftp.size(path).await.map_err(ftp_error)?.map(|s| s as u64);
        let mut reader = ftp.get(path).await.map_err(ftp_error)?;

        let (stream, abort) = spawn_source(chunk_size, move |sender| async move {
            let mut buf = vec![0u8; sender.chunk_size()];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                sender.send(Bytes::copy_from_slice(&buf[..n])).await?;
            }
            drop(reader);
            ftp.read_response_in(&[status::CLOSING_DATA_CONNECTION, status::REQUESTED_FILE_ACTION_OK])
                .await
                .map_err(ftp_error)?;
            let _ = ftp.quit().await;
            Ok(())
        });
        Ok(Download { stream, size, abort })
    }

    async fn upload(self: Box<Self>, path: &str) -> StorageResult<Box<dyn ByteSink>> {
        let mut ftp = self.stream;
        let path = path.to_string();
        Ok(spawn_sink(move |receiver| async move {
            let chunks = receiver
                .into_stream()
                .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string())));
            let mut reader = StreamReader::new(chunks);
            ftp.put(&path, &mut reader).await.map_err(ftp_error)?;
            let _ = ftp.quit().await;
            Ok(())
        }))
    }

    async fn quit(self: Box<Self>) -> StorageResult<()> {
        let mut ftp = self.stream;
        ftp.quit().await.map_err(ftp_error)
    }
}
