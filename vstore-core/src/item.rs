//! Storage item contract
//!
//! Every backend exposes files and folders through [`StorageItem`]. Callers
//! hold plain item values; nothing here caches state between calls.

use crate::error::{StorageError, StorageResult};
use crate::metadata::{Attributes, BasicProperties};
use crate::operations::{CollisionPolicy, DeleteMode, WriteMode};
use crate::stream::{ByteStream, ContentTypedStream, StreamSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    File,
    Folder,
}

/// Lazily produced folder children
pub type ItemStream<T> = Pin<Box<dyn Stream<Item = StorageResult<T>> + Send>>;

/// Operations shared by files and folders on every backend.
///
/// Operations that only make sense for one kind fail with `NotSupported` on
/// the other. Identity is the path: two items are equal iff their paths are.
#[async_trait]
pub trait StorageItem: Sized + Send + Sync + 'static {
    fn path(&self) -> &str;

    fn name(&self) -> &str;

    fn kind(&self) -> ItemKind;

    fn date_created(&self) -> Option<DateTime<Utc>>;

    fn attributes(&self) -> Attributes;

    fn is_file(&self) -> bool {
        self.kind() == ItemKind::File
    }

    fn is_folder(&self) -> bool {
        self.kind() == ItemKind::Folder
    }

    fn is_equal(&self, other: &Self) -> bool {
        self.path() == other.path()
    }

    /// Open a seekable, readable session.
    async fn open_read(&self, cancel: &CancellationToken) -> StorageResult<ContentTypedStream>;

    /// Forward-only chunk stream of the content.
    async fn open_sequential_read(&self, cancel: &CancellationToken) -> StorageResult<ByteStream>;

    async fn open_write(&self, mode: WriteMode, cancel: &CancellationToken) -> StorageResult<StreamSession>;

    /// Write that only becomes visible when the session is flushed or closed.
    async fn open_transacted_write(&self, _cancel: &CancellationToken) -> StorageResult<StreamSession> {
        Err(StorageError::not_supported("transacted write", self.path()))
    }

    async fn copy(
        &self,
        dest_folder: &Self,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Self>;

    async fn move_to(
        &self,
        dest_folder: &Self,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Self>;

    async fn rename(&self, new_name: &str, policy: CollisionPolicy, cancel: &CancellationToken) -> StorageResult<Self>;

    async fn delete(&self, mode: DeleteMode, cancel: &CancellationToken) -> StorageResult<()>;

    async fn properties(&self, cancel: &CancellationToken) -> StorageResult<BasicProperties>;

    async fn parent(&self, cancel: &CancellationToken) -> StorageResult<Self>;

    /// Children of a folder. Each call re-reads the backend.
    async fn enumerate(&self, cancel: &CancellationToken) -> StorageResult<ItemStream<Self>>;

    async fn get_item(&self, name: &str, cancel: &CancellationToken) -> StorageResult<Self>;

    async fn try_get_item(&self, name: &str, cancel: &CancellationToken) -> StorageResult<Option<Self>> {
        match self.get_item(name, cancel).await {
            Ok(item) => Ok(Some(item)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_file(&self, name: &str, policy: CollisionPolicy, cancel: &CancellationToken) -> StorageResult<Self>;

    async fn create_folder(&self, name: &str, policy: CollisionPolicy, cancel: &CancellationToken)
        -> StorageResult<Self>;

    /// Thumbnails are produced outside the storage layer.
    async fn thumbnail(&self, _size: u32, _cancel: &CancellationToken) -> StorageResult<Option<ContentTypedStream>> {
        Ok(None)
    }
}

/// Collect a folder listing into memory.
pub async fn list_all<T: StorageItem>(folder: &T, cancel: &CancellationToken) -> StorageResult<Vec<T>> {
    use futures::StreamExt;

    let mut stream = folder.enumerate(cancel).await?;
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        items.push(item?);
    }
    Ok(items)
}
