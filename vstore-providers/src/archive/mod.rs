//! Zip archive backend
//!
//! A container file is presented as a folder. Reads stream one entry out of
//! the container on the blocking pool. Every mutation rebuilds the whole
//! container and commits it in one step: through a sibling temp file renamed
//! over a local container, or a truncating write through the backing item.

mod container;

use crate::item::Item;
use crate::local::LocalItem;
use crate::transfer;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use container::{Addition, ContainerSource, EntryInfo, Index, Rewrite};
use futures::{FutureExt, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use vstore_core::operations::resolve_name;
use vstore_core::path::{self as vpath, archive as apath};
use vstore_core::stream::bridge::spawn_blocking_source;
use vstore_core::stream::{DeferredFlushWriteStream, NonSeekableReadStream};
use vstore_core::{
    cancellable, Attributes, BasicProperties, ByteStream, CancellationToken, CollisionPolicy, ContentTypedStream,
    DeleteMode, ItemKind, ItemStream, NameResolution, StorageContext, StorageError, StorageItem, StorageResult,
    StorageStream, StreamSession, WriteMode,
};

/// A file or folder inside a zip container
#[derive(Debug, Clone)]
pub struct ArchiveItem {
    ctx: StorageContext,
    container: String,
    /// Normalized `/`-separated entry name, `""` for the container root
    entry: String,
    path: String,
    kind: ItemKind,
    modified: Option<DateTime<Utc>>,
    backing: Option<Arc<Item>>,
}

impl ArchiveItem {
    /// Open the item at an archive path whose container is a local file.
    pub async fn open(ctx: StorageContext, path: &str) -> StorageResult<Self> {
        let extensions = ctx.config().archive_extensions();
        let parts = apath::split(path, &extensions)
            .ok_or_else(|| StorageError::NotFound(format!("{path} is not inside an archive")))?;
        let meta = tokio::fs::metadata(parts.container)
            .await
            .map_err(|_| StorageError::NotFound(parts.container.to_string()))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(format!("{} is not a file", parts.container)));
        }
        let root = Self::root(ctx, parts.container.to_string(), None);
        root.descend(parts.entry).await
    }

    /// Open `entry` inside a container reached through another backend.
    pub async fn open_on(ctx: StorageContext, backing: Item, entry: &str) -> StorageResult<Self> {
        if !backing.is_file() {
            return Err(StorageError::not_supported("open as archive", backing.path()));
        }
        let container = backing.path().to_string();
        let root = Self::root(ctx, container, Some(Arc::new(backing)));
        root.descend(entry).await
    }

    fn root(ctx: StorageContext, container: String, backing: Option<Arc<Item>>) -> Self {
        Self {
            ctx,
            path: container.clone(),
            container,
            entry: String::new(),
            kind: ItemKind::Folder,
            modified: None,
            backing,
        }
    }

    fn at(&self, entry: String, kind: ItemKind, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            ctx: self.ctx.clone(),
            path: apath::logical_path(&self.container, &entry),
            container: self.container.clone(),
            entry,
            kind,
            modified,
            backing: self.backing.clone(),
        }
    }

    /// Resolve an entry path (host separators) below this root.
    pub(crate) async fn descend(self, entry_path: &str) -> StorageResult<Self> {
        let cancel = CancellationToken::new();
        let index = self.index(&cancel).await?;
        let entry = apath::to_entry_name(entry_path);
        if entry.is_empty() {
            return Ok(self);
        }
        let (kind, own) = container::lookup(&index.entries, &entry)
            .ok_or_else(|| StorageError::NotFound(apath::logical_path(&self.container, &entry)))?;
        let modified = own.and_then(|e| e.modified);
        Ok(self.at(entry, kind, modified))
    }

    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        if self.is_root() {
            vpath::file_name(&self.container)
        } else {
            self.entry.rsplit('/').next().unwrap_or(&self.entry)
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn date_created(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    pub fn attributes(&self) -> Attributes {
        match self.kind {
            ItemKind::Folder => Attributes::DIRECTORY,
            ItemKind::File => Attributes::NORMAL,
        }
    }

    pub fn is_root(&self) -> bool {
        self.entry.is_empty()
    }

    /// Path of the container file
    pub fn container_path(&self) -> &str {
        &self.container
    }

    fn require(&self, kind: ItemKind, operation: &str) -> StorageResult<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(StorageError::not_supported(operation, &self.path))
        }
    }

    /// The container itself, as an item of the backend that holds it
    pub async fn container_file(&self) -> StorageResult<Item> {
        match &self.backing {
            Some(backing) => Ok((**backing).clone()),
            None => Ok(LocalItem::file(self.ctx.clone(), &self.container).await?.into()),
        }
    }

    /// Root item over a (possibly renamed) container file.
    fn root_over(&self, container_file: Item) -> Self {
        match container_file {
            Item::Local(local) => Self::root(self.ctx.clone(), local.path().to_string(), None),
            other => Self::root(self.ctx.clone(), other.path().to_string(), Some(Arc::new(other))),
        }
    }

    async fn source(&self, cancel: &CancellationToken) -> StorageResult<ContainerSource> {
        let Some(backing) = &self.backing else {
            return Ok(ContainerSource::File(PathBuf::from(&self.container)));
        };
        let mut chunks = backing.open_sequential_read(cancel).await.map_err(|e| match e {
            StorageError::NotFound(_) | StorageError::Cancelled => e,
            other => StorageError::Unavailable(format!("{}: {other}", self.container)),
        })?;
        let body = cancellable(cancel, async {
            let mut body = BytesMut::new();
            while let Some(chunk) = chunks.next().await {
                body.extend_from_slice(&chunk?);
            }
            Ok(body.freeze())
        })
        .await?;
        Ok(ContainerSource::Memory(body))
    }

    async fn index(&self, cancel: &CancellationToken) -> StorageResult<Index> {
        let source = self.source(cancel).await?;
        let index = tokio::task::spawn_blocking(move || {
            let mut archive = source.open()?;
            container::read_index(&mut archive)
        })
        .await??;
        for name in &index.skipped {
            tracing::warn!(parent: self.ctx.span(), "Skipping unsafe entry {:?} in {}", name, self.container);
        }
        Ok(index)
    }

    /// Rebuild the container with the plan computed from a fresh index, then
    /// commit it.
    async fn mutate<F>(&self, cancel: &CancellationToken, plan: F) -> StorageResult<()>
    where
        F: FnOnce(&[EntryInfo]) -> StorageResult<Rewrite> + Send + 'static,
    {
        let source = self.source(cancel).await?;
        let compression = self.ctx.config().archive.compression;
        let rebuilt = cancellable(cancel, async move {
            tokio::task::spawn_blocking(move || {
                let mut archive = source.open()?;
                let index = container::read_index(&mut archive)?;
                let plan = plan(&index.entries)?;
                container::rewrite(&mut archive, plan, compression)
            })
            .await?
        })
        .await?;
        self.commit(rebuilt, cancel).await
    }

    async fn commit(&self, rebuilt: Vec<u8>, cancel: &CancellationToken) -> StorageResult<()> {
        let size = rebuilt.len();
        match &self.backing {
            Some(backing) => {
                let mut out = backing.open_write(WriteMode::Truncate, cancel).await?;
                out.write_all(&rebuilt).await?;
                out.close().await?;
            }
            None => {
                let target = PathBuf::from(&self.container);
                let dir = vpath::parent(&self.container)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."));
                tokio::task::spawn_blocking(move || {
                    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
                    std::io::Write::write_all(&mut tmp, &rebuilt)?;
                    tmp.as_file().sync_all()?;
                    tmp.persist(&target).map_err(|e| StorageError::from(e.error))?;
                    Ok::<_, StorageError>(())
                })
                .await??;
            }
        }
        tracing::debug!(parent: self.ctx.span(), "Rewrote {} ({} bytes)", self.container, size);
        Ok(())
    }

    /// Open the entry as a chunk stream, returning its uncompressed size and
    /// the token that stops the reader.
    async fn entry_stream(&self, cancel: &CancellationToken) -> StorageResult<(ByteStream, u64, CancellationToken)> {
        self.require(ItemKind::File, "read")?;
        let source = self.source(cancel).await?;
        let name = self.entry.clone();
        let (found_tx, found_rx) = oneshot::channel::<StorageResult<u64>>();

        let (stream, abort) = spawn_blocking_source(self.ctx.chunk_size(), move |sender| {
            let located = (|| {
                let mut archive = source.open()?;
                let index = container::read_index(&mut archive)?;
                let entry = index
                    .entries
                    .iter()
                    .find(|e| e.name == name && !e.is_dir)
                    .ok_or_else(|| StorageError::NotFound(name.clone()))?;
                Ok::<_, StorageError>((archive, entry.index, entry.size))
            })();
            let (mut archive, index) = match located {
                Ok((archive, index, size)) => {
                    let _ = found_tx.send(Ok(size));
                    (archive, index)
                }
                Err(err) => {
                    let _ = found_tx.send(Err(err));
                    return Ok(());
                }
            };
            container::copy_entry(&mut archive, index, sender).map(|_| ())
        });

        let size = cancellable(cancel, async {
            found_rx
                .await
                .map_err(|_| StorageError::IoFailure("archive reader stopped".into()))?
        })
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => StorageError::NotFound(self.path.clone()),
            other => other,
        });
        match size {
            Ok(size) => Ok((stream, size, abort)),
            Err(err) => {
                abort.cancel();
                Err(err)
            }
        }
    }

    pub async fn open_read(&self, cancel: &CancellationToken) -> StorageResult<ContentTypedStream> {
        if self.is_root() {
            return self.container_file().await?.open_read(cancel).await;
        }
        let (stream, size, abort) = self.entry_stream(cancel).await?;
        let session = StreamSession::new(NonSeekableReadStream::new(stream, size)).with_dispose(move || abort.cancel());
        Ok(ContentTypedStream::for_name(session, self.name()))
    }

    pub async fn open_sequential_read(&self, cancel: &CancellationToken) -> StorageResult<ByteStream> {
        if self.is_root() {
            return self.container_file().await?.open_sequential_read(cancel).await;
        }
        let (stream, _, _) = self.entry_stream(cancel).await?;
        Ok(stream)
    }

    /// Buffered write committed as a container rewrite on flush or close.
    pub async fn open_write(&self, mode: WriteMode, cancel: &CancellationToken) -> StorageResult<StreamSession> {
        if self.is_root() {
            return self.container_file().await?.open_write(mode, cancel).await;
        }
        self.require(ItemKind::File, "write")?;
        let initial = match mode {
            WriteMode::Truncate => Vec::new(),
            WriteMode::Update => self.read_entry(cancel).await?,
        };

        let item = self.clone();
        let commit = Box::new(move |body: Bytes| {
            async move {
                let name = item.entry.clone();
                let cancel = CancellationToken::new();
                item.mutate(&cancel, move |entries| {
                    let mut plan = Rewrite::default();
                    plan.drop_entries(entries.iter().filter(|e| e.name == name));
                    plan.additions.push(Addition::File { name, body });
                    Ok(plan)
                })
                .await
            }
            .boxed()
        });
        Ok(StreamSession::new(DeferredFlushWriteStream::with_initial(initial, commit)))
    }

    async fn read_entry(&self, cancel: &CancellationToken) -> StorageResult<Vec<u8>> {
        let source = self.source(cancel).await?;
        let name = self.entry.clone();
        tokio::task::spawn_blocking(move || {
            let mut archive = source.open()?;
            let index = container::read_index(&mut archive)?;
            let entry = index
                .entries
                .iter()
                .find(|e| e.name == name && !e.is_dir)
                .ok_or_else(|| StorageError::NotFound(name.clone()))?;
            container::read_entry(&mut archive, entry.index)
        })
        .await?
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
        if self.is_root() {
            return self.container_file().await?.copy(dest_folder, new_name, policy, cancel).await;
        }
        transfer::copy_into(&Item::from(self.clone()), dest_folder, new_name, policy, cancel).await
    }

    pub async fn move_to(
        &self,
        _dest_folder: &Item,
        _new_name: &str,
        _policy: CollisionPolicy,
        _cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        Err(StorageError::not_supported("move", &self.path))
    }

    /// Resolve `name` against the direct children of the folder entry `folder`.
    async fn resolve_in(
        &self,
        folder: &str,
        name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<NameResolution> {
        if !vpath::is_valid_name(name) {
            return Err(StorageError::NotSupported(format!("invalid name: {name:?}")));
        }
        let index = self.index(cancel).await?;
        let taken: Vec<String> = container::children(&index.entries, folder)
            .into_iter()
            .map(|c| c.name)
            .collect();
        resolve_name(name, policy, |candidate| {
            let exists = taken.iter().any(|t| t == &candidate);
            async move { Ok(exists) }
        })
        .await
    }

    pub async fn rename(
        &self,
        new_name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        if self.is_root() {
            let renamed = self.container_file().await?.rename(new_name, policy, cancel).await?;
            return Ok(self.root_over(renamed).into());
        }

        let folder = container::parent_entry(&self.entry).to_string();
        let resolution = self.resolve_in(&folder, new_name, policy, cancel).await?;
        let target = container::join_entry(&folder, resolution.name());
        if target == self.entry {
            return Ok(self.clone().into());
        }
        if let NameResolution::UseExisting(_) = resolution {
            tracing::debug!(parent: self.ctx.span(), "{} exists, leaving {} in place", target, self.path);
            return Ok(self.clone().into());
        }

        let replace = matches!(resolution, NameResolution::Replace(_));
        let from = self.entry.clone();
        let to = target.clone();
        self.mutate(cancel, move |entries| {
            let mut plan = Rewrite::default();
            let moving: Vec<&EntryInfo> = container::subtree(entries, &from).collect();
            if moving.is_empty() {
                return Err(StorageError::NotFound(from.clone()));
            }
            if replace {
                plan.drop_entries(container::subtree(entries, &to));
            }
            for entry in moving {
                plan.remap.insert(entry.index, Some(container::renamed(entry, &from, &to)));
            }
            Ok(plan)
        })
        .await?;
        Ok(self.at(target, self.kind, self.modified).into())
    }

    pub async fn delete(&self, mode: DeleteMode, cancel: &CancellationToken) -> StorageResult<()> {
        if self.is_root() {
            return self.container_file().await?.delete(mode, cancel).await;
        }
        if mode == DeleteMode::Recycle {
            return Err(StorageError::not_supported("recycle", &self.path));
        }
        let name = self.entry.clone();
        let path = self.path.clone();
        self.mutate(cancel, move |entries| {
            let mut plan = Rewrite::default();
            plan.drop_entries(container::subtree(entries, &name));
            if plan.remap.is_empty() {
                return Err(StorageError::NotFound(path));
            }
            Ok(plan)
        })
        .await
    }

    pub async fn properties(&self, cancel: &CancellationToken) -> StorageResult<BasicProperties> {
        if self.is_root() {
            return self.container_file().await?.properties(cancel).await;
        }
        let index = self.index(cancel).await?;
        let (_, own) = container::lookup(&index.entries, &self.entry)
            .ok_or_else(|| StorageError::NotFound(self.path.clone()))?;
        let size = match (self.kind, own) {
            (ItemKind::File, Some(entry)) => entry.size,
            _ => 0,
        };
        let modified = own.and_then(|e| e.modified);
        Ok(BasicProperties::new()
            .with_size(size)
            .with_created(modified)
            .with_modified(modified))
    }

    pub async fn parent(&self, cancel: &CancellationToken) -> StorageResult<Item> {
        if self.is_root() {
            return self.container_file().await?.parent(cancel).await;
        }
        let parent = container::parent_entry(&self.entry);
        if parent.is_empty() {
            return Ok(Self::root(self.ctx.clone(), self.container.clone(), self.backing.clone()).into());
        }
        Ok(self.at(parent.to_string(), ItemKind::Folder, None).into())
    }

    fn child(&self, child: &container::Child<'_>) -> Self {
        self.at(
            container::join_entry(&self.entry, &child.name),
            child.kind,
            child.entry.and_then(|e| e.modified),
        )
    }

    pub async fn enumerate(&self, cancel: &CancellationToken) -> StorageResult<ItemStream<Item>> {
        self.require(ItemKind::Folder, "enumerate")?;
        let index = self.index(cancel).await?;
        let items: Vec<StorageResult<Item>> = container::children(&index.entries, &self.entry)
            .iter()
            .map(|child| Ok(self.child(child).into()))
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    pub async fn get_item(&self, name: &str, cancel: &CancellationToken) -> StorageResult<Item> {
        self.require(ItemKind::Folder, "get item")?;
        let index = self.index(cancel).await?;
        container::children(&index.entries, &self.entry)
            .iter()
            .find(|child| child.name == name)
            .map(|child| self.child(child).into())
            .ok_or_else(|| StorageError::NotFound(apath::logical_path(&self.container, &container::join_entry(&self.entry, name))))
    }

    pub async fn create_file(
        &self,
        name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        self.create_entry(name, ItemKind::File, policy, cancel).await
    }

    pub async fn create_folder(
        &self,
        name: &str,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        self.create_entry(name, ItemKind::Folder, policy, cancel).await
    }

    async fn create_entry(
        &self,
        name: &str,
        kind: ItemKind,
        policy: CollisionPolicy,
        cancel: &CancellationToken,
    ) -> StorageResult<Item> {
        self.require(ItemKind::Folder, "create")?;
        let resolution = self.resolve_in(&self.entry, name, policy, cancel).await?;
        if let NameResolution::UseExisting(existing) = &resolution {
            return self.get_item(existing, cancel).await;
        }

        let target = container::join_entry(&self.entry, resolution.name());
        let replace = matches!(resolution, NameResolution::Replace(_));
        let added = target.clone();
        self.mutate(cancel, move |entries| {
            let mut plan = Rewrite::default();
            if replace {
                plan.drop_entries(container::subtree(entries, &added));
            }
            plan.additions.push(match kind {
                ItemKind::File => Addition::File {
                    name: added,
                    body: Bytes::new(),
                },
                ItemKind::Folder => Addition::Folder { name: added },
            });
            Ok(plan)
        })
        .await?;
        Ok(self.at(target, kind, Some(Utc::now())).into())
    }

    /// Sum of the uncompressed sizes of every file below this folder.
    pub async fn uncompressed_size(&self, cancel: &CancellationToken) -> StorageResult<u64> {
        self.require(ItemKind::Folder, "uncompressed size")?;
        let index = self.index(cancel).await?;
        let total = if self.is_root() {
            index.entries.iter().filter(|e| !e.is_dir).map(|e| e.size).sum()
        } else {
            container::subtree(&index.entries, &self.entry)
                .filter(|e| !e.is_dir)
                .map(|e| e.size)
                .sum()
        };
        Ok(total)
    }
}

/// Create an empty zip at `path`. An existing non-empty file is a collision.
pub async fn create_empty_container(ctx: StorageContext, path: &str) -> StorageResult<ArchiveItem> {
    if let Ok(meta) = tokio::fs::metadata(path).await {
        if meta.is_dir() || meta.len() > 0 {
            return Err(StorageError::CollisionConflict(path.to_string()));
        }
    }
    let body = container::empty_container()?;
    tokio::fs::write(path, body).await?;
    tracing::info!(parent: ctx.span(), "Created archive {}", path);
    Ok(ArchiveItem::root(ctx, path.to_string(), None))
}
