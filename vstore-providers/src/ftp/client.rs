//! FTP client seam
//!
//! The backend only talks to a server through [`FtpConnector`] and the
//! [`FtpSession`] it hands out, one session per operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use vstore_core::config::FtpConfig;
use vstore_core::path::ftp::{FtpLocation, FtpScheme};
use vstore_core::stream::ByteSink;
use vstore_core::{ByteStream, CancellationToken, StorageError, StorageResult};

/// Where and as whom to connect
#[derive(Clone, PartialEq, Eq)]
pub struct FtpEndpoint {
    pub scheme: FtpScheme,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl FtpEndpoint {
    /// Endpoint for a parsed path, with credentials from the configured table.
    pub fn resolve(location: &FtpLocation, config: &FtpConfig) -> Self {
        let (username, password) = config.credentials_for(&location.host, location.user.as_deref());
        Self {
            scheme: location.scheme,
            host: location.host.clone(),
            port: location.port,
            username,
            password,
        }
    }

    /// `host:port`, with IPv6 hosts bracketed
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for FtpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpEndpoint")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A running `RETR`
pub struct Download {
    pub stream: ByteStream,
    /// Declared size, when the server reported one
    pub size: Option<u64>,
    /// Stops the transfer and drops the connection
    pub abort: CancellationToken,
}

/// Opens sessions. Implementations decide the transport.
#[async_trait]
pub trait FtpConnector: Send + Sync + fmt::Debug {
    async fn connect(&self, endpoint: &FtpEndpoint) -> StorageResult<Box<dyn FtpSession>>;
}

/// One logged-in control connection
#[async_trait]
pub trait FtpSession: Send {
    async fn size(&mut self, path: &str) -> StorageResult<Option<u64>>;

    async fn modified(&mut self, path: &str) -> StorageResult<Option<DateTime<Utc>>>;

    async fn file_exists(&mut self, path: &str) -> StorageResult<bool> {
        match self.size(path).await {
            Ok(size) => Ok(size.is_some()),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn directory_exists(&mut self, path: &str) -> StorageResult<bool>;

    async fn rename(&mut self, from: &str, to: &str) -> StorageResult<()>;

    async fn delete_file(&mut self, path: &str) -> StorageResult<()>;

    async fn delete_directory(&mut self, path: &str) -> StorageResult<()>;

    /// Start a streamed download. The session is consumed; the connection
    /// closes when the stream ends or is aborted.
    async fn download(self: Box<Self>, path: &str, chunk_size: usize) -> StorageResult<Download>;

    /// Start a streamed upload replacing `path`. Finishing the sink completes
    /// the transfer; dropping it aborts.
    async fn upload(self: Box<Self>, path: &str) -> StorageResult<Box<dyn ByteSink>>;

    async fn quit(self: Box<Self>) -> StorageResult<()>;
}

/// Connector used when no FTP client is compiled in
#[derive(Debug, Default)]
pub struct UnavailableConnector;

#[async_trait]
impl FtpConnector for UnavailableConnector {
    async fn connect(&self, endpoint: &FtpEndpoint) -> StorageResult<Box<dyn FtpSession>> {
        Err(StorageError::Unavailable(format!(
            "{}: no FTP client compiled in (enable the `ftp-client` feature)",
            endpoint.address()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vstore_core::config::FtpCredential;
    use vstore_core::path::ftp;

    #[test]
    fn test_endpoint_credentials() {
        let mut config = FtpConfig::default();
        config.credentials.push(FtpCredential {
            host: "files.example.com".into(),
            username: "alice".into(),
            password: "secret".into(),
        });

        let loc = ftp::parse("ftp://files.example.com/pub").unwrap();
        let endpoint = FtpEndpoint::resolve(&loc, &config);
        assert_eq!(endpoint.username, "alice");
        assert_eq!(endpoint.password, "secret");
        assert_eq!(endpoint.address(), "files.example.com:21");

        let loc = ftp::parse("ftp://other.example.com/pub").unwrap();
        let endpoint = FtpEndpoint::resolve(&loc, &config);
        assert_eq!(endpoint.username, "anonymous");

        let loc = ftp::parse("ftp://[::1]:2121/").unwrap();
        assert_eq!(FtpEndpoint::resolve(&loc, &config).address(), "[::1]:2121");
    }

    #[test]
    fn test_debug_hides_password() {
        let loc = ftp::parse("ftp://bob@host/").unwrap();
        let mut endpoint = FtpEndpoint::resolve(&loc, &FtpConfig::default());
        endpoint.password = "hunter2".into();
        assert!(!format!("{endpoint:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_unavailable_connector() {
        let loc = ftp::parse("ftp://host/").unwrap();
        let endpoint = FtpEndpoint::resolve(&loc, &FtpConfig::default());
        let err = UnavailableConnector.connect(&endpoint).await.err().unwrap();
        assert!(err.is_transient());
    }
}
