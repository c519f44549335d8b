//! The tagged item type every backend produces

use crate::archive::ArchiveItem;
use crate::ftp::FtpItem;
use crate::local::LocalItem;
use crate::resolver::BackendKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vstore_core::{
    Attributes, BasicProperties, ByteStream, CancellationToken, CollisionPolicy, ContentTypedStream, DeleteMode,
    ItemKind, ItemStream, StorageContext, StorageItem, StorageResult, StreamSession, WriteMode,
};

/// A file or folder on any backend
#[derive(Debug, Clone)]
pub enum Item {
    Local(LocalItem),
    Archive(ArchiveItem),
    Ftp(FtpItem),
}

macro_rules! dispatch {
    ($item:expr, $inner:ident => $body:expr) => {
        match $item {
            Item::Local($inner) => $body,
            Item::Archive($inner) => $body,
            Item::Ftp($inner) => $body,
        }
    };
}

impl Item {
    pub fn backend(&self) -> BackendKind {
        match self {
            Item::Local(_) => BackendKind::Local,
            Item::Archive(_) => BackendKind::Archive,
            Item::Ftp(_) => BackendKind::Ftp,
        }
    }

    pub fn context(&self) -> &StorageContext {
        dispatch!(self, item => item.context())
    }

    pub fn as_archive(&self) -> Option<&ArchiveItem> {
        match self {
            Item::Archive(item) => Some(item),
            _ => None,
        }
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl Eq for Item {}

impl From<LocalItem> for Item {
    fn from(item: LocalItem) -> Self {
        Item::Local(item)
    }
}

impl From<ArchiveItem> for Item {
    fn from(item: ArchiveItem) -> Self {
        Item::Archive(item)
    }
}

impl From<FtpItem> for Item {
    fn from(item: FtpItem) -> Self {
        Item::Ftp(item)
    }
}

#[async_trait]
impl StorageItem for Item {
    fn path(&self) -> &str {
        dispatch!(self, item => item.path())
    }

    fn name(&self) -> &str {
        dispatch!(self, item => item.name())
    }

    fn kind(&self) -> ItemKind {
        dispatch!(self, item => item.kind())
    }

    fn date_created(&self) -> Option<DateTime<Utc>> {
        dispatch!(self, item => item.date_created())
    }

    fn attributes(&self) -> Attributes {
        dispatch!(self, item => item.attributes())
    }

    async fn open_read(&self, cancel: &CancellationToken) -> StorageResult<ContentTypedStream> {
        dispatch!(self, item => item.open_read(cancel).await)
    }

    async fn open_sequential_read(&self, cancel: &CancellationToken) -> StorageResult<ByteStream> {
        dispatch!(self, item => item.open_sequential_read(cancel).await)
    }

    async fn open_write(&self, mode: WriteMode, cancel: &CancellationToken) -> StorageResult<StreamSession> {
        dispatch!(self, item => item.open_write(mode, cancel).await)
    }

    async fn open_transacted_write(&self, cancel: &CancellationToken) -> StorageResult<StreamSession> {
        dispatch!(self, item => item.open_transacted_write(cancel).await)
    }

    async fn copy(
        &self,
        dest_folder: &Self,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Self> {
        dispatch!(self, item => item.copy(dest_folder, new_name, policy, cancel).await)
    }

    async fn move_to(
        &self,
        dest_folder: &Self,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Self> {
        dispatch!(self, item => item.move_to(dest_folder, new_name, policy, cancel).await)
    }

    async fn rename(&self, new_name: &str, policy: CollisionPolicy, cancel: &CancellationToken) -> StorageResult<Self> {
        dispatch!(self, item => item.rename(new_name, policy, cancel).await)
    }

    async fn delete(&self, mode: DeleteMode, cancel: &CancellationToken) -> StorageResult<()> {
        dispatch!(self, item => item.delete(mode, cancel).await)
    }

    async fn properties(&self, cancel: &CancellationToken) -> StorageResult<BasicProperties> {
        dispatch!(self, item => item.properties(cancel).await)
    }

    async fn parent(&self, cancel: &CancellationToken) -> StorageResult<Self> {
        dispatch!(self, item => item.parent(cancel).await)
    }

    async fn enumerate(&self, cancel: &CancellationToken) -> StorageResult<ItemStream<Self>> {
        dispatch!(self, item => item.enumerate(cancel).await)
    }

    async fn get_item(&self, name: &str, cancel: &CancellationToken) -> StorageResult<Self> {
        dispatch!(self, item => item.get_item(name, cancel).await)
    }

    async fn create_file(&self, name: &str, policy: CollisionPolicy, cancel: &CancellationToken) -> StorageResult<Self> {
        dispatch!(self, item => item.create_file(name, policy, cancel).await)
    }

    async fn create_folder(
        &self,
        name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Self> {
        dispatch!(self, item => item.create_folder(name, policy, cancel).await)
    }
}
