//! FTP backend
//!
//! Each operation opens its own control connection through the configured
//! [`FtpConnector`], does its work and quits. Nothing is pooled. Reads and
//! writes are forward-only transfers wrapped in the stream adapters.

pub mod client;

#[cfg(feature = "ftp-client")]
mod async_ftp;
#[cfg(test)]
pub(crate) mod memory;

pub use client::{Download, FtpConnector, FtpEndpoint, FtpSession, UnavailableConnector};

use crate::item::Item;
use crate::transfer;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use vstore_core::operations::resolve_name;
use vstore_core::path::{self as vpath, ftp};
use vstore_core::stream::{ForwardWriteStream, NonSeekableReadStream};
use vstore_core::{
    cancellable, Attributes, BasicProperties, ByteStream, CancellationToken, CollisionPolicy, ContentTypedStream,
    DeleteMode, ItemKind, ItemStream, NameResolution, StorageContext, StorageError, StorageResult, StreamSession,
    WriteMode,
};

/// The connector compiled into this build
#[cfg(feature = "ftp-client")]
pub fn default_connector() -> Arc<dyn FtpConnector> {
    Arc::new(async_ftp::AsyncFtpConnector)
}

/// The connector compiled into this build
#[cfg(not(feature = "ftp-client"))]
pub fn default_connector() -> Arc<dyn FtpConnector> {
    Arc::new(UnavailableConnector)
}

/// Fire `abort` when the caller's token fires, until the transfer ends.
fn abort_on_cancel(cancel: &CancellationToken, abort: &CancellationToken) {
    let (cancel, abort) = (cancel.clone(), abort.clone());
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => abort.cancel(),
            _ = abort.cancelled() => {}
        }
    });
}

async fn occupied(session: &mut Box<dyn FtpSession>, remote: &str) -> StorageResult<bool> {
    Ok(session.file_exists(remote).await? || session.directory_exists(remote).await?)
}

/// Remove whatever sits at `remote`.
async fn remove_remote(session: &mut Box<dyn FtpSession>, remote: &str) -> StorageResult<()> {
    if session.file_exists(remote).await? {
        session.delete_file(remote).await
    } else {
        session.delete_directory(remote).await
    }
}

/// A file or folder on an FTP server
#[derive(Debug, Clone)]
pub struct FtpItem {
    ctx: StorageContext,
    connector: Arc<dyn FtpConnector>,
    path: String,
    /// `scheme://authority` or `\\host`
    prefix: String,
    remote: String,
    endpoint: FtpEndpoint,
    kind: ItemKind,
}

impl FtpItem {
    /// Describe `path` without contacting the server.
    pub fn new(ctx: StorageContext, connector: Arc<dyn FtpConnector>, path: &str, kind: ItemKind) -> StorageResult<Self> {
        let location = ftp::parse(path).ok_or_else(|| StorageError::NotFound(format!("{path} is not an FTP path")))?;
        let endpoint = FtpEndpoint::resolve(&location, &ctx.config().ftp);
        let prefix = ftp::authority_prefix(path).to_string();
        let remote = match location.remote_path.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        Ok(Self {
            path: ftp::from_remote_path(&prefix, &remote),
            ctx,
            connector,
            prefix,
            remote,
            endpoint,
            kind,
        })
    }

    fn at(&self, remote: String, kind: ItemKind) -> Self {
        Self {
            ctx: self.ctx.clone(),
            connector: self.connector.clone(),
            path: ftp::from_remote_path(&self.prefix, &remote),
            prefix: self.prefix.clone(),
            remote,
            endpoint: self.endpoint.clone(),
            kind,
        }
    }

    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.remote.rsplit('/').find(|s| !s.is_empty()).unwrap_or("")
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// The server does not report creation times.
    pub fn date_created(&self) -> Option<DateTime<Utc>> {
        None
    }

    pub fn attributes(&self) -> Attributes {
        match self.kind {
            ItemKind::Folder => Attributes::DIRECTORY,
            ItemKind::File => Attributes::NORMAL,
        }
    }

    pub fn remote_path(&self) -> &str {
        &self.remote
    }

    pub fn endpoint(&self) -> &FtpEndpoint {
        &self.endpoint
    }

    fn require(&self, kind: ItemKind, operation: &str) -> StorageResult<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(StorageError::not_supported(operation, &self.path))
        }
    }

    /// One connection attempt, bounded by the connect timeout and `cancel`.
    async fn ensure_connected(&self, cancel: &CancellationToken) -> StorageResult<Box<dyn FtpSession>> {
        let address = self.endpoint.address();
        let timeout = self.ctx.config().ftp.connect_timeout();
        let attempt = tokio::time::timeout(timeout, self.connector.connect(&self.endpoint));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(StorageError::Unavailable(format!("{address}: connect cancelled")))
            }
            result = attempt => match result {
                Ok(Ok(session)) => Ok(session),
                Ok(Err(StorageError::NotSupported(reason))) => Err(StorageError::NotSupported(reason)),
                Ok(Err(e)) => {
                    tracing::warn!(parent: self.ctx.span(), "Failed to connect to {}: {}", address, e);
                    Err(StorageError::Unavailable(format!("{address}: {e}")))
                }
                Err(_) => Err(StorageError::Unavailable(format!(
                    "{address}: no answer within {}s",
                    timeout.as_secs()
                ))),
            },
        }
    }

    /// Quit the session unless the operation was cancelled, then hand back `result`.
    async fn finish<T>(&self, session: Box<dyn FtpSession>, result: StorageResult<T>) -> StorageResult<T> {
        if !matches!(result, Err(StorageError::Cancelled)) {
            if let Err(e) = session.quit().await {
                tracing::debug!(parent: self.ctx.span(), "QUIT on {} failed: {}", self.endpoint.address(), e);
            }
        }
        result
    }

    /// Apply `policy` to `name` inside the remote folder `dir`.
    async fn resolve_in(
        &self,
        session: Box<dyn FtpSession>,
        dir: &str,
        name: &str,
        policy: CollisionPolicy,
    ) -> (Box<dyn FtpSession>, StorageResult<NameResolution>) {
        let shared = Mutex::new(session);
        let session_ref = &shared;
        let result = resolve_name(name, policy, move |candidate| {
            let remote = ftp::remote_join(dir, &candidate);
            async move { occupied(&mut *session_ref.lock().await, &remote).await }
        })
        .await;
        (shared.into_inner(), result)
    }

    async fn start_download(&self, cancel: &CancellationToken) -> StorageResult<Download> {
        self.require(ItemKind::File, "read")?;
        let session = self.ensure_connected(cancel).await?;
        let download = cancellable(cancel, session.download(&self.remote, self.ctx.chunk_size())).await?;
        abort_on_cancel(cancel, &download.abort);
        Ok(download)
    }

    pub async fn open_read(&self, cancel: &CancellationToken) -> StorageResult<ContentTypedStream> {
        let download = self.start_download(cancel).await?;
        let abort = download.abort;
        let stream = NonSeekableReadStream::new(download.stream, download.size.unwrap_or(0));
        let session = StreamSession::new(stream).with_dispose(move || abort.cancel());
        Ok(ContentTypedStream::for_name(session, self.name()))
    }

    pub async fn open_sequential_read(&self, cancel: &CancellationToken) -> StorageResult<ByteStream> {
        let download = self.start_download(cancel).await?;
        let guard = download.abort.drop_guard();
        Ok(Box::pin(download.stream.map(move |chunk| {
            let _transfer = &guard;
            chunk
        })))
    }

    pub async fn open_write(&self, mode: WriteMode, cancel: &CancellationToken) -> StorageResult<StreamSession> {
        self.require(ItemKind::File, "write")?;
        if mode == WriteMode::Update {
            return Err(StorageError::not_supported("update in place", &self.path));
        }
        let session = self.ensure_connected(cancel).await?;
        let sink = cancellable(cancel, session.upload(&self.remote)).await?;
        Ok(StreamSession::new(ForwardWriteStream::new(sink)))
    }

    pub async fn open_transacted_write(&self, _cancel: &CancellationToken) -> StorageResult<StreamSession> {
        Err(StorageError::not_supported("transacted write", &self.path))
    }

    pub async fn copy(
        &self,
        dest_folder: &Item,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        transfer::copy_into(&Item::from(self.clone()), dest_folder, new_name, policy, cancel).await
    }

    pub async fn move_to(
        &self,
        dest_folder: &Item,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        transfer::move_into(&Item::from(self.clone()), dest_folder, new_name, policy, cancel).await
    }

    /// Best effort: an occupied target under `FailIfExists` or `Skip` is
    /// logged and the item comes back unrenamed.
    pub async fn rename(
        &self,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        if !vpath::is_valid_name(new_name) {
            return Err(StorageError::NotSupported(format!("invalid name: {new_name:?}")));
        }
        let dir = ftp::remote_parent(&self.remote).ok_or_else(|| StorageError::not_supported("rename", &self.path))?;
        if ftp::remote_join(&dir, new_name) == self.remote {
            return Ok(self.clone().into());
        }
        let policy = match policy {
            CollisionPolicy::FailIfExists => CollisionPolicy::Skip,
            other => other,
        };

        let session = self.ensure_connected(cancel).await?;
        let (mut session, resolution) = self.resolve_in(session, &dir, new_name, policy).await;
        let result = async {
            let target = match resolution? {
                NameResolution::UseExisting(name) => {
                    tracing::warn!(parent: self.ctx.span(), "{} already exists, {} was not renamed", name, self.path);
                    return Ok(None);
                }
                NameResolution::Replace(name) => {
                    let target = ftp::remote_join(&dir, &name);
                    cancellable(cancel, remove_remote(&mut session, &target)).await?;
                    target
                }
                NameResolution::Create(name) => ftp::remote_join(&dir, &name),
            };
            cancellable(cancel, session.rename(&self.remote, &target)).await?;
            Ok::<_, StorageError>(Some(target))
        }
        .await;
        let renamed = self.finish(session, result).await?;
        Ok(match renamed {
            Some(target) => self.at(target, self.kind).into(),
            None => self.clone().into(),
        })
    }

    pub async fn delete(&self, mode: DeleteMode, cancel: &CancellationToken) -> StorageResult<()> {
        if mode == DeleteMode::Recycle {
            return Err(StorageError::not_supported("recycle", &self.path));
        }
        let mut session = self.ensure_connected(cancel).await?;
        let result = match self.kind {
            ItemKind::File => cancellable(cancel, session.delete_file(&self.remote)).await,
            ItemKind::Folder => cancellable(cancel, session.delete_directory(&self.remote)).await,
        };
        self.finish(session, result).await
    }

    pub async fn properties(&self, cancel: &CancellationToken) -> StorageResult<BasicProperties> {
        self.require(ItemKind::File, "properties")?;
        let mut session = self.ensure_connected(cancel).await?;
        let result = cancellable(cancel, async {
            let size = session.size(&self.remote).await?;
            let modified = session.modified(&self.remote).await?;
            Ok(BasicProperties::new().with_size(size.unwrap_or(0)).with_modified(modified))
        })
        .await;
        self.finish(session, result).await
    }

    pub async fn parent(&self, _cancel: &CancellationToken) -> StorageResult<Item> {
        let parent = ftp::remote_parent(&self.remote)
            .ok_or_else(|| StorageError::NotFound(format!("{} has no parent", self.path)))?;
        Ok(self.at(parent, ItemKind::Folder).into())
    }

    pub async fn enumerate(&self, _cancel: &CancellationToken) -> StorageResult<ItemStream<Item>> {
        Err(StorageError::not_supported("enumerate", &self.path))
    }

    pub async fn get_item(&self, name: &str, cancel: &CancellationToken) -> StorageResult<Item> {
        self.require(ItemKind::Folder, "get item")?;
        if !vpath::is_valid_name(name) {
            return Err(StorageError::NotFound(format!("invalid name: {name:?}")));
        }
        let remote = ftp::remote_join(&self.remote, name);
        let mut session = self.ensure_connected(cancel).await?;
        let result = cancellable(cancel, async {
            if session.file_exists(&remote).await? {
                Ok(Some(ItemKind::File))
            } else if session.directory_exists(&remote).await? {
                Ok(Some(ItemKind::Folder))
            } else {
                Ok(None)
            }
        })
        .await;
        match self.finish(session, result).await? {
            Some(kind) => Ok(self.at(remote, kind).into()),
            None => Err(StorageError::NotFound(ftp::from_remote_path(&self.prefix, &remote))),
        }
    }

    pub async fn create_file(
        &self,
        name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        self.require(ItemKind::Folder, "create file")?;
        if !vpath::is_valid_name(name) {
            return Err(StorageError::NotSupported(format!("invalid name: {name:?}")));
        }
        let session = self.ensure_connected(cancel).await?;
        let (mut session, resolution) = self.resolve_in(session, &self.remote, name, policy).await;
        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(e) => return self.finish(session, Err(e)).await,
        };
        let target = ftp::remote_join(&self.remote, resolution.name());
        match resolution {
            NameResolution::UseExisting(_) => {
                let is_file = cancellable(cancel, session.file_exists(&target)).await;
                let kind = match self.finish(session, is_file).await? {
                    true => ItemKind::File,
                    false => ItemKind::Folder,
                };
                return Ok(self.at(target, kind).into());
            }
            NameResolution::Replace(_) => {
                if let Err(e) = cancellable(cancel, remove_remote(&mut session, &target)).await {
                    return self.finish(session, Err(e)).await;
                }
            }
            NameResolution::Create(_) => {}
        }
        let sink = cancellable(cancel, session.upload(&target)).await?;
        cancellable(cancel, sink.finish()).await?;
        tracing::debug!(parent: self.ctx.span(), "Created {}", ftp::from_remote_path(&self.prefix, &target));
        Ok(self.at(target, ItemKind::File).into())
    }

    pub async fn create_folder(
        &self,
        _name: &str,
        _policy: CollisionPolicy,
        _cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        Err(StorageError::not_supported("create folder", &self.path))
    }
}
