//! Copy and move between any two items using only the storage contract.
//!
//! Backends fall back to this whenever they have no native path between the
//! source and destination (FTP to anything, archive to anything, or local to a
//! non-local folder).

use crate::item::Item;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use vstore_core::path::is_separator;
use vstore_core::{
    cancellable, list_all, ByteStream, CancellationToken, CollisionPolicy, DeleteMode, ItemKind, StorageError,
    StorageItem, StorageResult, StorageStream, StreamSession, WriteMode,
};

enum Transferred {
    Copied(Item),
    Skipped(Item),
}

impl Transferred {
    fn into_item(self) -> Item {
        match self {
            Transferred::Copied(item) | Transferred::Skipped(item) => item,
        }
    }
}

/// Copy `source` (file or folder tree) into `dest_folder` as `name`.
pub async fn copy_into(
    source: &Item,
    dest_folder: &Item,
    name: &str,
    policy: CollisionPolicy,
    cancel: &CancellationToken,
) -> StorageResult<Item> {
    transfer(source, dest_folder, name, policy, cancel)
        .await
        .map(Transferred::into_item)
}

/// Copy, then delete the source. A skipped copy leaves the source alone.
pub async fn move_into(
    source: &Item,
    dest_folder: &Item,
    name: &str,
    policy: CollisionPolicy,
    cancel: &CancellationToken,
) -> StorageResult<Item> {
    match transfer(source, dest_folder, name, policy, cancel).await? {
        Transferred::Copied(item) => {
            source.delete(DeleteMode::Permanent, cancel).await?;
            Ok(item)
        }
        Transferred::Skipped(item) => Ok(item),
    }
}

/// Stream the content of `source` into `target`, replacing it.
pub async fn pump(source: &Item, target: &Item, cancel: &CancellationToken) -> StorageResult<u64> {
    let chunks = source.open_sequential_read(cancel).await?;
    let sink = target.open_write(WriteMode::Truncate, cancel).await?;
    drain(chunks, sink, cancel).await
}

/// Write every chunk into `sink` and close it. On error the sink is
/// dropped unclosed, so buffered and transacted targets keep their old
/// content.
async fn drain(mut chunks: ByteStream, mut sink: StreamSession, cancel: &CancellationToken) -> StorageResult<u64> {
    cancellable(cancel, async {
        let mut total = 0u64;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        sink.close().await?;
        Ok(total)
    })
    .await
}

pub(crate) fn is_within(path: &str, ancestor: &str) -> bool {
    match path.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with(|c: char| is_separator(c) || c == '/'),
        None => false,
    }
}

/// The existing file `name` in `folder`, when `policy` would overwrite it.
async fn replaceable_file(
    folder: &Item,
    name: &str,
    policy: CollisionPolicy,
    cancel: &CancellationToken,
) -> StorageResult<Option<Item>> {
    if policy != CollisionPolicy::ReplaceExisting {
        return Ok(None);
    }
    Ok(folder
        .try_get_item(name, cancel)
        .await?
        .filter(|existing| existing.kind() == ItemKind::File))
}

/// Overwrite `existing` through a transacted write where the backend has
/// one. Archive writes are deferred until close, so they replace the entry
/// only once the whole body arrived.
async fn replacing_write(existing: &Item, cancel: &CancellationToken) -> StorageResult<StreamSession> {
    match existing.open_transacted_write(cancel).await {
        Err(StorageError::NotSupported(_)) => existing.open_write(WriteMode::Truncate, cancel).await,
        other => other,
    }
}

fn transfer<'a>(
    source: &'a Item,
    dest_folder: &'a Item,
    name: &'a str,
    policy: CollisionPolicy,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, StorageResult<Transferred>> {
    async move {
        if !dest_folder.is_folder() {
            return Err(StorageError::not_supported("copy into a file", dest_folder.path()));
        }
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        if policy == CollisionPolicy::Skip {
            if let Some(existing) = dest_folder.try_get_item(name, cancel).await? {
                return Ok(Transferred::Skipped(existing));
            }
        }

        if source.is_folder() {
            if is_within(dest_folder.path(), source.path()) {
                return Err(StorageError::not_supported("copy a folder into itself", source.path()));
            }
            let target = dest_folder.create_folder(name, policy, cancel).await?;
            for child in list_all(source, cancel).await? {
                transfer(&child, &target, child.name(), policy, cancel).await?;
            }
            Ok(Transferred::Copied(target))
        } else {
            // The source must be readable before the destination is touched.
            let chunks = source.open_sequential_read(cancel).await?;
            let (target, sink) = match replaceable_file(dest_folder, name, policy, cancel).await? {
                Some(existing) => {
                    let sink = replacing_write(&existing, cancel).await?;
                    (existing, sink)
                }
                None => {
                    let created = dest_folder.create_file(name, policy, cancel).await?;
                    let sink = created.open_write(WriteMode::Truncate, cancel).await?;
                    (created, sink)
                }
            };
            let bytes = drain(chunks, sink, cancel).await?;
            tracing::debug!(
                parent: source.context().span(),
                from = source.path(),
                to = target.path(),
                bytes,
                "copied"
            );
            Ok(Transferred::Copied(target))
        }
    }
    .boxed()
}
