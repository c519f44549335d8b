//! Local filesystem backend

use crate::item::Item;
use crate::transfer;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use vstore_core::path::{self as vpath};
use vstore_core::operations::resolve_name;
use vstore_core::stream::DeferredFlushWriteStream;
use vstore_core::{
    cancellable, Attributes, BasicProperties, ByteStream, CancellationToken, CollisionPolicy,
    ContentTypedStream, DeleteMode, ItemKind, ItemStream, NameResolution, StorageContext, StorageError,
    StorageResult, StorageStream, StreamSession, WriteMode,
};

/// Maps an I/O error on `path` so that `NotFound` names the path.
fn io_error(path: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |err| match err.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
        _ => StorageError::from(err),
    }
}

/// A file or folder on the host filesystem
#[derive(Debug, Clone)]
pub struct LocalItem {
    ctx: StorageContext,
    path: String,
    kind: ItemKind,
    created: Option<DateTime<Utc>>,
    read_only: bool,
}

impl LocalItem {
    /// Stat `path` and describe it. Missing paths are `NotFound`.
    pub async fn from_path(ctx: StorageContext, path: &str) -> StorageResult<Self> {
        let meta = fs::metadata(path).await.map_err(io_error(path))?;
        Ok(Self::from_metadata(ctx, path.to_string(), &meta))
    }

    pub async fn file(ctx: StorageContext, path: &str) -> StorageResult<Self> {
        let item = Self::from_path(ctx, path).await?;
        match item.kind {
            ItemKind::File => Ok(item),
            ItemKind::Folder => Err(StorageError::NotFound(format!("{path} is not a file"))),
        }
    }

    pub async fn folder(ctx: StorageContext, path: &str) -> StorageResult<Self> {
        let item = Self::from_path(ctx, path).await?;
        match item.kind {
            ItemKind::Folder => Ok(item),
            ItemKind::File => Err(StorageError::NotFound(format!("{path} is not a folder"))),
        }
    }

    fn from_metadata(ctx: StorageContext, path: String, meta: &std::fs::Metadata) -> Self {
        Self {
            ctx,
            path,
            kind: if meta.is_dir() { ItemKind::Folder } else { ItemKind::File },
            created: meta.created().ok().map(DateTime::<Utc>::from),
            read_only: meta.permissions().readonly(),
        }
    }

    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        vpath::file_name(&self.path)
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn date_created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    pub fn attributes(&self) -> Attributes {
        let base = match self.kind {
            ItemKind::Folder => Attributes::DIRECTORY,
            ItemKind::File => Attributes::NORMAL,
        };
        base.with_read_only(self.read_only)
    }

    fn require(&self, kind: ItemKind, operation: &str) -> StorageResult<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(StorageError::not_supported(operation, &self.path))
        }
    }

    /// Apply `policy` to `name` among the children of this folder.
    async fn resolve_child(&self, name: &str, policy: CollisionPolicy) -> StorageResult<NameResolution> {
        resolve_name(name, policy, |candidate| {
            let candidate = vpath::join(&self.path, &candidate);
            async move { fs::try_exists(&candidate).await.map_err(StorageError::from) }
        })
        .await
    }

    pub async fn open_read(&self, _cancel: &CancellationToken) -> StorageResult<ContentTypedStream> {
        self.require(ItemKind::File, "read")?;
        let file = fs::File::open(&self.path).await.map_err(io_error(&self.path))?;
        let size = file.metadata().await?.len();
        let stream = FileStream::new(file, size, true, false);
        Ok(ContentTypedStream::for_name(StreamSession::new(stream), self.name()))
    }

    pub async fn open_sequential_read(&self, _cancel: &CancellationToken) -> StorageResult<ByteStream> {
        self.require(ItemKind::File, "read")?;
        let file = fs::File::open(&self.path).await.map_err(io_error(&self.path))?;
        let chunks = ReaderStream::with_capacity(file, self.ctx.chunk_size()).map(|chunk| chunk.map_err(StorageError::from));
        Ok(Box::pin(chunks))
    }

    pub async fn open_write(&self, mode: WriteMode, _cancel: &CancellationToken) -> StorageResult<StreamSession> {
        self.require(ItemKind::File, "write")?;
        let file = fs::OpenOptions::new()
            .read(mode == WriteMode::Update)
            .write(true)
            .truncate(mode == WriteMode::Truncate)
            .open(&self.path)
            .await
            .map_err(io_error(&self.path))?;
        let size = file.metadata().await?.len();
        Ok(StreamSession::new(FileStream::new(file, size, mode == WriteMode::Update, true)))
    }

    /// Buffered write that lands through a sibling temp file renamed over
    /// the target on commit.
    pub async fn open_transacted_write(&self, _cancel: &CancellationToken) -> StorageResult<StreamSession> {
        self.require(ItemKind::File, "transacted write")?;
        let target = PathBuf::from(&self.path);
        let dir = vpath::parent(&self.path)
            .map(PathBuf::from)
            .ok_or_else(|| StorageError::not_supported("transacted write", &self.path))?;
        let span = self.ctx.span().clone();

        let commit = Box::new(move |body: Bytes| {
            async move {
                tokio::task::spawn_blocking(move || {
                    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
                    std::io::Write::write_all(&mut tmp, &body)?;
                    tmp.as_file().sync_all()?;
                    tmp.persist(&target).map_err(|e| StorageError::from(e.error))?;
                    tracing::debug!(parent: &span, "Committed {} bytes to {}", body.len(), target.display());
                    Ok::<_, StorageError>(())
                })
                .await?
            }
            .boxed()
        });
        Ok(StreamSession::new(DeferredFlushWriteStream::new(commit)))
    }

    pub async fn copy(
        &self,
        dest_folder: &Item,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        check_name(new_name)?;
        match dest_folder {
            Item::Local(folder) if self.kind == ItemKind::File => {
                self.copy_file_local(folder, new_name, policy, cancel).await
            }
            _ => transfer::copy_into(&Item::from(self.clone()), dest_folder, new_name, policy, cancel).await,
        }
    }

    async fn copy_file_local(
        &self,
        folder: &LocalItem,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        folder.require(ItemKind::Folder, "copy into")?;
        fs::metadata(&self.path).await.map_err(io_error(&self.path))?;
        let resolution = folder.resolve_child(new_name, policy).await?;
        let target = vpath::join(&folder.path, resolution.name());
        let replace = match resolution {
            NameResolution::UseExisting(_) => return Ok(Self::from_path(self.ctx.clone(), &target).await?.into()),
            NameResolution::Replace(_) => {
                if fs::metadata(&target).await?.is_dir() {
                    fs::remove_dir_all(&target).await?;
                }
                true
            }
            NameResolution::Create(_) => false,
        };

        let source = PathBuf::from(&self.path);
        let dir = PathBuf::from(&folder.path);
        let target_path = PathBuf::from(&target);
        cancellable(cancel, async move {
            tokio::task::spawn_blocking(move || {
                let mut input = std::fs::File::open(&source)?;
                let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
                std::io::copy(&mut input, tmp.as_file_mut())?;
                let persisted = if replace {
                    tmp.persist(&target_path)
                } else {
                    tmp.persist_noclobber(&target_path)
                };
                persisted.map_err(|e| StorageError::from(e.error))?;
                Ok::<_, StorageError>(())
            })
            .await?
        })
        .await?;

        tracing::debug!(parent: self.ctx.span(), "Copied {} to {}", self.path, target);
        Ok(Self::from_path(self.ctx.clone(), &target).await?.into())
    }

    pub async fn move_to(
        &self,
        dest_folder: &Item,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        check_name(new_name)?;
        let Item::Local(folder) = dest_folder else {
            return transfer::move_into(&Item::from(self.clone()), dest_folder, new_name, policy, cancel).await;
        };
        folder.require(ItemKind::Folder, "move into")?;
        if self.kind == ItemKind::Folder && transfer::is_within(&folder.path, &self.path) {
            return Err(StorageError::not_supported("move a folder into itself", &self.path));
        }
        let resolution = folder.resolve_child(new_name, policy).await?;
        let target = vpath::join(&folder.path, resolution.name());
        self.rename_to(target, resolution, cancel).await
    }

    pub async fn rename(
        &self,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        check_name(new_name)?;
        let parent = vpath::parent(&self.path).ok_or_else(|| StorageError::not_supported("rename", &self.path))?;
        let resolution = resolve_name(new_name, policy, |candidate| {
            let candidate = vpath::join(parent, &candidate);
            async move { fs::try_exists(&candidate).await.map_err(StorageError::from) }
        })
        .await?;
        let target = vpath::join(parent, resolution.name());
        self.rename_to(target, resolution, cancel).await
    }

    async fn rename_to(
        &self,
        target: String,
        resolution: NameResolution,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        if target == self.path {
            return Ok(self.clone().into());
        }
        match resolution {
            NameResolution::UseExisting(_) => {
                tracing::debug!(parent: self.ctx.span(), "{} exists, leaving {} in place", target, self.path);
                return Ok(self.clone().into());
            }
            NameResolution::Replace(_) => {
                let existing = fs::symlink_metadata(&target).await.map_err(io_error(&target))?;
                if existing.is_dir() || self.kind == ItemKind::Folder {
                    self.replace_parked(&target, cancel).await?;
                    return Ok(Self::from_path(self.ctx.clone(), &target).await?.into());
                }
            }
            NameResolution::Create(_) => {}
        }
        // A file renamed over a file replaces it in one step.
        cancellable(cancel, async { fs::rename(&self.path, &target).await.map_err(io_error(&self.path)) }).await?;
        Ok(Self::from_path(self.ctx.clone(), &target).await?.into())
    }

    /// Park `target` in a sibling temp dir, move this item into its place,
    /// then drop the parked copy. A failed move puts `target` back.
    async fn replace_parked(&self, target: &str, cancel: &CancellationToken) -> StorageResult<()> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        fs::symlink_metadata(&self.path).await.map_err(io_error(&self.path))?;
        let dir = vpath::parent(target).ok_or_else(|| StorageError::not_supported("replace", target))?;
        let parking = tempfile::Builder::new().prefix(".vstore-replace").tempdir_in(dir)?;
        let parked = parking.path().join("previous");
        fs::rename(target, &parked).await.map_err(io_error(target))?;

        if let Err(err) = fs::rename(&self.path, target).await {
            if let Err(restore) = fs::rename(&parked, target).await {
                tracing::warn!(parent: self.ctx.span(), "Could not restore {}: {}", target, restore);
            }
            return Err(io_error(&self.path)(err));
        }
        if let Err(e) = fs::remove_dir_all(parking.path()).await {
            tracing::warn!(parent: self.ctx.span(), "Leaving replaced copy of {} behind: {}", target, e);
        }
        Ok(())
    }

    pub async fn delete(&self, mode: DeleteMode, _cancel: &CancellationToken) -> StorageResult<()> {
        if mode == DeleteMode::Recycle {
            return Err(StorageError::not_supported("recycle", &self.path));
        }
        remove_entry(&self.path).await
    }

    pub async fn properties(&self, _cancel: &CancellationToken) -> StorageResult<BasicProperties> {
        let meta = fs::metadata(&self.path).await.map_err(io_error(&self.path))?;
        let size = if meta.is_dir() { 0 } else { meta.len() };
        Ok(BasicProperties::new()
            .with_size(size)
            .with_created(meta.created().ok().map(DateTime::<Utc>::from))
            .with_modified(meta.modified().ok().map(DateTime::<Utc>::from)))
    }

    pub async fn parent(&self, _cancel: &CancellationToken) -> StorageResult<Item> {
        let parent = vpath::parent(&self.path).ok_or_else(|| StorageError::NotFound(format!("{} has no parent", self.path)))?;
        Ok(Self::from_path(self.ctx.clone(), parent).await?.into())
    }

    pub async fn enumerate(&self, _cancel: &CancellationToken) -> StorageResult<ItemStream<Item>> {
        self.require(ItemKind::Folder, "enumerate")?;
        let entries = fs::read_dir(&self.path).await.map_err(io_error(&self.path))?;
        let ctx = self.ctx.clone();

        let children = futures::stream::unfold((entries, ctx), |(mut entries, ctx)| async move {
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => return None,
                    Err(e) => {
                        tracing::warn!(parent: ctx.span(), "Listing stopped early: {}", e);
                        return None;
                    }
                };
                let path = entry.path().to_string_lossy().into_owned();
                match fs::metadata(&path).await {
                    Ok(meta) => {
                        let item = LocalItem::from_metadata(ctx.clone(), path, &meta);
                        return Some((Ok(Item::from(item)), (entries, ctx)));
                    }
                    Err(e) => tracing::warn!(parent: ctx.span(), "Skipping {}: {}", path, e),
                }
            }
        });
        Ok(Box::pin(children))
    }

    pub async fn get_item(&self, name: &str, _cancel: &CancellationToken) -> StorageResult<Item> {
        self.require(ItemKind::Folder, "get item")?;
        if !vpath::is_valid_name(name) {
            return Err(StorageError::NotFound(name.to_string()));
        }
        Ok(Self::from_path(self.ctx.clone(), &vpath::join(&self.path, name)).await?.into())
    }

    pub async fn create_file(
        &self,
        name: &str,
        policy: CollisionPolicy,
        _cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        self.require(ItemKind::Folder, "create file")?;
        check_name(name)?;
        let resolution = self.resolve_child(name, policy).await?;
        let target = vpath::join(&self.path, resolution.name());
        match resolution {
            NameResolution::UseExisting(_) => {}
            NameResolution::Replace(_) => {
                if fs::metadata(&target).await?.is_dir() {
                    fs::remove_dir_all(&target).await?;
                }
                fs::File::create(&target).await?;
            }
            NameResolution::Create(_) => {
                fs::OpenOptions::new().write(true).create_new(true).open(&target).await?;
            }
        }
        Ok(Self::from_path(self.ctx.clone(), &target).await?.into())
    }

    pub async fn create_folder(
        &self,
        name: &str,
        policy: CollisionPolicy,
        _cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        self.require(ItemKind::Folder, "create folder")?;
        check_name(name)?;
        let resolution = self.resolve_child(name, policy).await?;
        let target = vpath::join(&self.path, resolution.name());
        match resolution {
            NameResolution::UseExisting(_) => {}
            NameResolution::Replace(_) => {
                remove_entry(&target).await?;
                fs::create_dir(&target).await?;
            }
            NameResolution::Create(_) => fs::create_dir(&target).await?,
        }
        Ok(Self::from_path(self.ctx.clone(), &target).await?.into())
    }
}

fn check_name(name: &str) -> StorageResult<()> {
    if vpath::is_valid_name(name) {
        Ok(())
    } else {
        Err(StorageError::NotSupported(format!("invalid name: {name:?}")))
    }
}

async fn remove_entry(path: &str) -> StorageResult<()> {
    let meta = fs::symlink_metadata(path).await.map_err(io_error(path))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).await.map_err(io_error(path))
    } else {
        fs::remove_file(path).await.map_err(io_error(path))
    }
}

/// Random-access stream over an open file
struct FileStream {
    file: fs::File,
    position: u64,
    size: u64,
    readable: bool,
    writable: bool,
}

impl FileStream {
    fn new(file: fs::File, size: u64, readable: bool, writable: bool) -> Self {
        Self {
            file,
            position: 0,
            size,
            readable,
            writable,
        }
    }
}

#[async_trait]
impl StorageStream for FileStream {
    fn can_read(&self) -> bool {
        self.readable
    }

    fn can_write(&self) -> bool {
        self.writable
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        if !self.readable {
            return Err(StorageError::NotSupported("stream is not readable".into()));
        }
        let n = self.file.read(buf).await?;
        self.position += n as u64;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        if !self.writable {
            return Err(StorageError::NotSupported("stream is not writable".into()));
        }
        let n = self.file.write(buf).await?;
        self.position += n as u64;
        self.size = self.size.max(self.position);
        Ok(n)
    }

    async fn seek(&mut self, position: u64) -> StorageResult<()> {
        self.position = self.file.seek(SeekFrom::Start(position)).await?;
        Ok(())
    }

    async fn flush(&mut self) -> StorageResult<()> {
        if self.writable {
            self.file.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vstore_core::{list_all, StorageItem};

    fn ctx() -> StorageContext {
        StorageContext::default()
    }

    async fn folder(path: &std::path::Path) -> Item {
        LocalItem::folder(ctx(), path.to_string_lossy().as_ref()).await.unwrap().into()
    }

    fn names(items: &[Item]) -> Vec<String> {
        let mut names: Vec<_> = items.iter().map(|i| i.name().to_string()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let root = folder(dir.path()).await;

        let file = root.create_file("a.txt", CollisionPolicy::FailIfExists, &cancel).await.unwrap();
        let mut out = file.open_write(WriteMode::Truncate, &cancel).await.unwrap();
        out.write_all(b"hello world").await.unwrap();
        out.close().await.unwrap();

        let mut input = file.open_read(&cancel).await.unwrap();
        assert_eq!(input.content_type(), "text/plain");
        assert_eq!(input.size(), 11);
        input.seek(6).await.unwrap();
        assert_eq!(input.read_to_end().await.unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_update_mode_overlays_content() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let path = dir.path().join("u.txt");
        std::fs::write(&path, b"hello world").unwrap();
        let file: Item = LocalItem::file(ctx(), path.to_string_lossy().as_ref()).await.unwrap().into();

        let mut out = file.open_write(WriteMode::Update, &cancel).await.unwrap();
        out.seek(6).await.unwrap();
        out.write_all(b"there").await.unwrap();
        out.close().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello there");
    }

    #[tokio::test]
    async fn test_transacted_write_is_invisible_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let path = dir.path().join("t.txt");
        std::fs::write(&path, b"before").unwrap();
        let file: Item = LocalItem::file(ctx(), path.to_string_lossy().as_ref()).await.unwrap().into();

        let mut out = file.open_transacted_write(&cancel).await.unwrap();
        out.write_all(b"after").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"before");
        out.close().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"after");
    }

    #[tokio::test]
    async fn test_create_file_collision_policies() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        std::fs::write(dir.path().join("a.txt"), b"original").unwrap();
        let root = folder(dir.path()).await;

        let err = root.create_file("a.txt", CollisionPolicy::FailIfExists, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::CollisionConflict(_)));

        let kept = root.create_file("a.txt", CollisionPolicy::Skip, &cancel).await.unwrap();
        assert_eq!(kept.name(), "a.txt");
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"original");

        let unique = root.create_file("a.txt", CollisionPolicy::GenerateUniqueName, &cancel).await.unwrap();
        assert_eq!(unique.name(), "a (2).txt");

        let replaced = root.create_file("a.txt", CollisionPolicy::ReplaceExisting, &cancel).await.unwrap();
        assert_eq!(replaced.name(), "a.txt");
        assert!(std::fs::read(dir.path().join("a.txt")).unwrap().is_empty());

        let listing = list_all(&root, &cancel).await.unwrap();
        assert_eq!(names(&listing), ["a (2).txt", "a.txt"]);
    }

    #[tokio::test]
    async fn test_copy_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        std::fs::create_dir(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("src.bin"), b"payload").unwrap();
        std::fs::write(dir.path().join("out").join("src.bin"), b"stale").unwrap();
        let root = folder(dir.path()).await;
        let out = root.get_item("out", &cancel).await.unwrap();
        let source = root.get_item("src.bin", &cancel).await.unwrap();

        let copied = source.copy(&out, "src.bin", CollisionPolicy::ReplaceExisting, &cancel).await.unwrap();
        assert_eq!(std::fs::read(copied.path()).unwrap(), b"payload");

        let renamed = copied.rename("dst.bin", CollisionPolicy::FailIfExists, &cancel).await.unwrap();
        assert_eq!(renamed.name(), "dst.bin");
        assert!(!dir.path().join("out").join("src.bin").exists());

        // taken name under skip leaves the item where it was
        std::fs::write(dir.path().join("out").join("taken.bin"), b"x").unwrap();
        let same = renamed.rename("taken.bin", CollisionPolicy::Skip, &cancel).await.unwrap();
        assert_eq!(same, renamed);
    }

    #[tokio::test]
    async fn test_move_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        std::fs::create_dir_all(dir.path().join("a").join("inner")).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        let root = folder(dir.path()).await;
        let a = root.get_item("a", &cancel).await.unwrap();
        let b = root.get_item("b", &cancel).await.unwrap();

        let inner = a.get_item("inner", &cancel).await.unwrap();
        assert!(matches!(
            a.move_to(&inner, "a", CollisionPolicy::FailIfExists, &cancel).await,
            Err(StorageError::NotSupported(_))
        ));

        let moved = a.move_to(&b, "a", CollisionPolicy::FailIfExists, &cancel).await.unwrap();
        assert!(moved.is_folder());
        assert!(!dir.path().join("a").exists());

        assert!(matches!(
            moved.delete(DeleteMode::Recycle, &cancel).await,
            Err(StorageError::NotSupported(_))
        ));
        moved.delete(DeleteMode::Permanent, &cancel).await.unwrap();
        assert!(!dir.path().join("b").join("a").exists());
    }

    #[tokio::test]
    async fn test_properties_parent_and_kind_checks() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        std::fs::write(dir.path().join("p.txt"), b"12345").unwrap();
        let root = folder(dir.path()).await;
        let file = root.get_item("p.txt", &cancel).await.unwrap();

        let props = file.properties(&cancel).await.unwrap();
        assert_eq!(props.size, 5);
        assert!(props.date_modified.is_some());
        assert_eq!(file.parent(&cancel).await.unwrap(), root);
        assert!(file.attributes().is_normal());
        assert!(root.attributes().directory);

        assert!(matches!(file.enumerate(&cancel).await, Err(StorageError::NotSupported(_))));
        assert!(matches!(root.open_read(&cancel).await, Err(StorageError::NotSupported(_))));
        assert!(root.try_get_item("missing", &cancel).await.unwrap().is_none());
        assert!(file.thumbnail(64, &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_names_with_separators_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("a.txt"), b"a").unwrap();
        let root = folder(dir.path()).await;
        let sub = root.get_item("sub", &cancel).await.unwrap();
        let file = sub.get_item("a.txt", &cancel).await.unwrap();

        for bad in ["../escaped.txt", "nested/a.txt", "..", ""] {
            assert!(matches!(
                file.rename(bad, CollisionPolicy::FailIfExists, &cancel).await,
                Err(StorageError::NotSupported(_))
            ));
            assert!(matches!(
                file.copy(&sub, bad, CollisionPolicy::FailIfExists, &cancel).await,
                Err(StorageError::NotSupported(_))
            ));
            assert!(matches!(
                file.move_to(&root, bad, CollisionPolicy::FailIfExists, &cancel).await,
                Err(StorageError::NotSupported(_))
            ));
        }
        assert!(!dir.path().join("escaped.txt").exists());
        assert_eq!(std::fs::read(dir.path().join("sub").join("a.txt")).unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_replace_keeps_target_when_source_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        std::fs::create_dir(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"keep me").unwrap();
        std::fs::create_dir(dir.path().join("folder")).unwrap();
        std::fs::write(dir.path().join("out").join("a.txt"), b"old copy").unwrap();
        let root = folder(dir.path()).await;
        let out = root.get_item("out", &cancel).await.unwrap();
        let a = root.get_item("a.txt", &cancel).await.unwrap();
        std::fs::remove_file(dir.path().join("a.txt")).unwrap();

        let err = a.rename("b.txt", CollisionPolicy::ReplaceExisting, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"keep me");

        let err = a.rename("folder", CollisionPolicy::ReplaceExisting, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(dir.path().join("folder").is_dir());

        let err = a.copy(&out, "a.txt", CollisionPolicy::ReplaceExisting, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(std::fs::read(dir.path().join("out").join("a.txt")).unwrap(), b"old copy");
    }

    #[tokio::test]
    async fn test_replace_rename_over_folder_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        std::fs::write(dir.path().join("a.txt"), b"new").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"old").unwrap();
        std::fs::create_dir_all(dir.path().join("c").join("deep")).unwrap();
        let root = folder(dir.path()).await;

        let a = root.get_item("a.txt", &cancel).await.unwrap();
        let b = a.rename("b.txt", CollisionPolicy::ReplaceExisting, &cancel).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"new");

        let c = b.rename("c", CollisionPolicy::ReplaceExisting, &cancel).await.unwrap();
        assert!(c.is_file());
        assert_eq!(std::fs::read(dir.path().join("c")).unwrap(), b"new");

        // nothing parked is left behind
        let listing = list_all(&root, &cancel).await.unwrap();
        assert_eq!(names(&listing), ["c"]);
    }
}
