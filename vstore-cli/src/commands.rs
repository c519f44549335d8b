// SPDX-License-Identifier: AGPL-3.0-or-later
//! CLI command implementations

use chrono::{DateTime, Utc};
use console::style;
use futures::StreamExt;
use serde::Serialize;
use std::path::Path;
use tabled::{Table, Tabled};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vstore_core::path::{archive as apath, ftp as fpath};
use vstore_core::{
    cancellable, list_all, Attributes, BasicProperties, CancellationToken, CollisionPolicy, DeleteMode, ItemKind,
    StorageError, StorageItem, StorageResult, StorageStream, WriteMode,
};
use vstore_providers::archive::create_empty_container;
use vstore_providers::{BackendKind, Item, PathResolver};

/// Shared state for one invocation
pub struct Cx {
    pub resolver: PathResolver,
    pub cancel: CancellationToken,
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Relative local paths are taken from the current directory.
fn absolutize(cx: &Cx, path: &str) -> StorageResult<String> {
    if cx.resolver.backend_for(path) == BackendKind::Ftp || Path::new(path).is_absolute() {
        return Ok(path.to_string());
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path).to_string_lossy().into_owned())
}

/// Split `path` into its parent path and last name. `None` at a root.
fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches(is_separator);
    if fpath::is_ftp_path(trimmed) && fpath::authority_prefix(trimmed).len() == trimmed.len() {
        return None;
    }
    let idx = trimmed.rfind(is_separator)?;
    let name = &trimmed[idx + 1..];
    let parent = if idx == 0 { &trimmed[..1] } else { &trimmed[..idx] };
    if name.is_empty() {
        None
    } else {
        Some((parent, name))
    }
}

async fn parent_folder<'a>(cx: &Cx, path: &'a str) -> StorageResult<(Item, &'a str)> {
    let (parent, name) =
        split_parent(path).ok_or_else(|| StorageError::NotSupported(format!("{path} has no parent folder")))?;
    let folder = cx.resolver.resolve_folder(parent, &cx.cancel).await?;
    Ok((folder, name))
}

/// Properties, or `None` where the backend has none to give
async fn try_properties(item: &Item, cancel: &CancellationToken) -> StorageResult<Option<BasicProperties>> {
    match item.properties(cancel).await {
        Ok(props) => Ok(Some(props)),
        Err(StorageError::NotSupported(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Format a timestamp for display
fn format_time(dt: Option<DateTime<Utc>>) -> String {
    dt.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Format file size
fn format_size(size: Option<u64>, human: bool) -> String {
    match size {
        Some(s) if human => bytesize::ByteSize(s).to_string(),
        Some(s) => s.to_string(),
        None => "-".to_string(),
    }
}

fn format_kind(kind: ItemKind) -> String {
    match kind {
        ItemKind::Folder => style("d").cyan().to_string(),
        ItemKind::File => "-".to_string(),
    }
}

#[derive(Tabled)]
struct LsEntry {
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Modified")]
    modified: String,
    #[tabled(rename = "Name")]
    name: String,
}

/// List folder contents
pub async fn ls(cx: &Cx, path: &str, long: bool, human: bool) -> StorageResult<()> {
    let path = absolutize(cx, path)?;
    let folder = cx.resolver.resolve_folder(&path, &cx.cancel).await?;
    tracing::debug!("Listing {} ({})", folder.path(), folder.backend());

    let mut items = list_all(&folder, &cx.cancel).await?;
    items.sort_by(|a, b| a.name().cmp(b.name()));
    if items.is_empty() {
        println!("(empty folder)");
        return Ok(());
    }

    if long {
        let mut entries = Vec::with_capacity(items.len());
        for item in &items {
            let props = match try_properties(item, &cx.cancel).await {
                Ok(props) => props,
                Err(StorageError::Cancelled) => return Err(StorageError::Cancelled),
                Err(e) => {
                    tracing::warn!("Failed to read properties of {}: {}", item.path(), e);
                    None
                }
            };
            let size = props.as_ref().filter(|_| item.is_file()).map(|p| p.size);
            entries.push(LsEntry {
                kind: format_kind(item.kind()),
                size: format_size(size, human),
                modified: format_time(props.and_then(|p| p.date_modified)),
                name: item.name().to_string(),
            });
        }
        println!("{}", Table::new(entries));
    } else {
        for item in &items {
            match item.kind() {
                ItemKind::Folder => println!("{}/", style(item.name()).cyan()),
                ItemKind::File => println!("{}", item.name()),
            }
        }
    }
    Ok(())
}

/// Write file contents to stdout
pub async fn cat(cx: &Cx, path: &str) -> StorageResult<()> {
    let path = absolutize(cx, path)?;
    let file = cx.resolver.resolve_file(&path, &cx.cancel).await?;
    let mut chunks = file.open_sequential_read(&cx.cancel).await?;
    let mut stdout = tokio::io::stdout();
    cancellable(&cx.cancel, async {
        while let Some(chunk) = chunks.next().await {
            stdout.write_all(&chunk?).await?;
        }
        stdout.flush().await?;
        Ok(())
    })
    .await
}

/// Copy a file or folder tree into a folder
pub async fn cp(cx: &Cx, source: &str, dest: &str, name: Option<&str>, policy: CollisionPolicy) -> StorageResult<()> {
    let source = cx.resolver.resolve(&absolutize(cx, source)?, &cx.cancel).await?;
    let dest = cx.resolver.resolve_folder(&absolutize(cx, dest)?, &cx.cancel).await?;
    let name = name.unwrap_or(source.name()).to_string();
    tracing::debug!("Copying {} -> {} as {}", source.path(), dest.path(), name);

    let copied = source.copy(&dest, &name, policy, &cx.cancel).await?;
    println!("Copied {} -> {}", source.path(), copied.path());
    Ok(())
}

/// Move a file or folder tree into a folder
pub async fn mv(cx: &Cx, source: &str, dest: &str, name: Option<&str>, policy: CollisionPolicy) -> StorageResult<()> {
    let source = cx.resolver.resolve(&absolutize(cx, source)?, &cx.cancel).await?;
    let dest = cx.resolver.resolve_folder(&absolutize(cx, dest)?, &cx.cancel).await?;
    let name = name.unwrap_or(source.name()).to_string();
    tracing::debug!("Moving {} -> {} as {}", source.path(), dest.path(), name);

    let moved = source.move_to(&dest, &name, policy, &cx.cancel).await?;
    println!("Moved {} -> {}", source.path(), moved.path());
    Ok(())
}

pub async fn rename(cx: &Cx, path: &str, new_name: &str, policy: CollisionPolicy) -> StorageResult<()> {
    let item = cx.resolver.resolve(&absolutize(cx, path)?, &cx.cancel).await?;
    let renamed = item.rename(new_name, policy, &cx.cancel).await?;
    if renamed == item {
        println!("{} unchanged", item.path());
    } else {
        println!("Renamed {} -> {}", item.path(), renamed.path());
    }
    Ok(())
}

/// Remove files or folders
pub async fn rm(cx: &Cx, paths: &[String]) -> StorageResult<()> {
    for path in paths {
        let item = cx.resolver.resolve(&absolutize(cx, path)?, &cx.cancel).await?;
        tracing::debug!("Removing {}", item.path());
        item.delete(DeleteMode::Permanent, &cx.cancel).await?;
        println!("Removed {}", path);
    }
    Ok(())
}

/// Create folders
pub async fn mkdir(cx: &Cx, paths: &[String], policy: CollisionPolicy) -> StorageResult<()> {
    for path in paths {
        let path = absolutize(cx, path)?;
        let (folder, name) = parent_folder(cx, &path).await?;
        let created = folder.create_folder(name, policy, &cx.cancel).await?;
        println!("Created {}", created.path());
    }
    Ok(())
}

/// Create empty files
pub async fn touch(cx: &Cx, paths: &[String]) -> StorageResult<()> {
    for path in paths {
        let path = absolutize(cx, path)?;
        let (folder, name) = parent_folder(cx, &path).await?;
        let file = folder.create_file(name, CollisionPolicy::Skip, &cx.cancel).await?;
        tracing::debug!("Touched {}", file.path());
    }
    Ok(())
}

/// Write stdin to a file
pub async fn put(cx: &Cx, path: &str, policy: CollisionPolicy) -> StorageResult<()> {
    let path = absolutize(cx, path)?;
    let (folder, name) = parent_folder(cx, &path).await?;
    if policy == CollisionPolicy::Skip {
        if let Some(existing) = folder.try_get_item(name, &cx.cancel).await? {
            println!("{} exists, skipped", existing.path());
            return Ok(());
        }
    }

    let file = folder.create_file(name, policy, &cx.cancel).await?;
    let mut session = file.open_write(WriteMode::Truncate, &cx.cancel).await?;
    let chunk_size = cx.resolver.context().chunk_size();
    let written = cancellable(&cx.cancel, async {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; chunk_size];
        let mut total = 0u64;
        loop {
            let n = stdin.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            session.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        session.close().await?;
        Ok(total)
    })
    .await?;

    println!("Wrote {} to {}", bytesize::ByteSize(written), file.path());
    Ok(())
}

#[derive(Serialize)]
struct StatReport {
    path: String,
    backend: BackendKind,
    kind: ItemKind,
    attributes: Attributes,
    properties: Option<BasicProperties>,
}

/// Show file or folder information
pub async fn stat(cx: &Cx, path: &str, json: bool) -> StorageResult<()> {
    let item = cx.resolver.resolve(&absolutize(cx, path)?, &cx.cancel).await?;
    let report = StatReport {
        path: item.path().to_string(),
        backend: item.backend(),
        kind: item.kind(),
        attributes: item.attributes(),
        properties: try_properties(&item, &cx.cancel).await?,
    };

    if json {
        let text = serde_json::to_string_pretty(&report).map_err(|e| StorageError::IoFailure(e.to_string()))?;
        println!("{text}");
        return Ok(());
    }

    println!("  Path: {}", report.path);
    println!("  Backend: {}", report.backend);
    println!("  Type: {:?}", report.kind);
    if report.attributes.read_only {
        println!("  Read-only: yes");
    }
    if let Some(props) = &report.properties {
        if item.is_file() {
            println!("  Size: {} ({})", props.size, bytesize::ByteSize(props.size));
        }
        if let Some(modified) = props.date_modified {
            println!("  Modified: {}", modified);
        }
    }
    if let Some(created) = item.date_created() {
        println!("  Created: {}", created);
    }
    Ok(())
}

/// Show which backend a path belongs to, without touching it
pub async fn which(cx: &Cx, path: &str) -> StorageResult<()> {
    let path = absolutize(cx, path)?;
    let backend = cx.resolver.backend_for(&path);
    println!("{}: {}", path, style(backend).green());

    match backend {
        BackendKind::Archive => {
            let extensions = cx.resolver.context().config().archive_extensions();
            if let Some(parts) = apath::split(&path, &extensions) {
                println!("  Container: {}", parts.container);
                println!("  Entry: {}", if parts.is_root() { "(root)" } else { parts.entry });
            }
        }
        BackendKind::Ftp => {
            if let Some(location) = fpath::parse(&path) {
                println!("  Scheme: {}", location.scheme.as_str());
                println!("  Host: {}:{}", location.host, location.port);
                println!("  Remote path: {}", location.remote_path);
            }
        }
        BackendKind::Local => {}
    }
    Ok(())
}

/// Create an empty zip archive
pub async fn init_zip(cx: &Cx, path: &str) -> StorageResult<()> {
    let path = absolutize(cx, path)?;
    let archive = create_empty_container(cx.resolver.context().clone(), &path).await?;
    println!("Created archive {}", archive.path());
    Ok(())
}
