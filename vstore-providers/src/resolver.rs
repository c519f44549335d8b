//! Path resolution
//!
//! Turns a path string into an [`Item`] of the right backend. Claims are
//! tried in order: archive marker, FTP scheme, local filesystem.

use crate::archive::ArchiveItem;
use crate::ftp::{self, FtpConnector, FtpItem};
use crate::item::Item;
use crate::local::LocalItem;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use vstore_core::path::{archive as apath, ftp as fpath};
use vstore_core::{CancellationToken, ItemKind, StorageContext, StorageError, StorageItem, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Archive,
    Ftp,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Archive => write!(f, "archive"),
            BackendKind::Ftp => write!(f, "ftp"),
        }
    }
}

/// Builds items from path strings
#[derive(Debug, Clone)]
pub struct PathResolver {
    ctx: StorageContext,
    connector: Arc<dyn FtpConnector>,
}

impl PathResolver {
    pub fn new(ctx: StorageContext) -> Self {
        Self {
            ctx,
            connector: ftp::default_connector(),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn FtpConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    fn is_ftp(path: &str) -> bool {
        fpath::is_ftp_path(path) && fpath::parse(path).is_some()
    }

    /// Classify `path` by syntax alone.
    pub fn backend_for(&self, path: &str) -> BackendKind {
        let extensions = self.ctx.config().archive_extensions();
        if apath::split(path, &extensions).is_some() {
            BackendKind::Archive
        } else if Self::is_ftp(path) {
            BackendKind::Ftp
        } else {
            BackendKind::Local
        }
    }

    /// An FTP path names a folder when it ends in a separator or is the server root.
    fn ftp_kind(path: &str) -> ItemKind {
        let remote = fpath::to_remote_path(path);
        if remote == "/" || path.ends_with('/') || path.ends_with('\\') {
            ItemKind::Folder
        } else {
            ItemKind::File
        }
    }

    fn ftp_item(&self, path: &str, kind: ItemKind) -> StorageResult<FtpItem> {
        FtpItem::new(self.ctx.clone(), self.connector.clone(), path, kind)
    }

    /// Open `path` as an archive item if its container claims it.
    async fn probe_archive(&self, path: &str) -> StorageResult<Option<ArchiveItem>> {
        let extensions = self.ctx.config().archive_extensions();
        let Some(parts) = apath::split(path, &extensions) else {
            return Ok(None);
        };

        if Self::is_ftp(parts.container) {
            let backing = self.ftp_item(parts.container, ItemKind::File)?;
            let root = ArchiveItem::open_on(self.ctx.clone(), backing.into(), "").await?;
            return Ok(Some(self.descend_nested(root, parts.entry).await?));
        }

        match tokio::fs::metadata(parts.container).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(None),
        }
        match ArchiveItem::open(self.ctx.clone(), parts.container).await {
            Ok(root) => Ok(Some(self.descend_nested(root, parts.entry).await?)),
            Err(StorageError::Unavailable(reason)) => {
                tracing::debug!(parent: self.ctx.span(), "{} does not open as an archive: {}", parts.container, reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Walk `entry` below `root`, stepping into containers stored inside it
    /// (`outer.zip/inner.zip/a.txt`). An entry that only looks like a
    /// container, or does not open as one, is taken literally.
    async fn descend_nested(&self, mut root: ArchiveItem, mut entry: &str) -> StorageResult<ArchiveItem> {
        let extensions = self.ctx.config().archive_extensions();
        while let Some(nested) = apath::split(entry, &extensions) {
            let inner = match root.clone().descend(nested.container).await {
                Ok(inner) if inner.kind() == ItemKind::File => inner,
                _ => break,
            };
            match ArchiveItem::open_on(self.ctx.clone(), inner.into(), "").await {
                Ok(inner_root) => {
                    root = inner_root;
                    entry = nested.entry;
                }
                Err(StorageError::Unavailable(reason)) => {
                    tracing::debug!(parent: self.ctx.span(), "{} is not a nested archive: {}", nested.container, reason);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        root.descend(entry).await
    }

    /// Resolve `path` to a file or folder.
    pub async fn resolve(&self, path: &str, _cancel: &CancellationToken) -> StorageResult<Item> {
        if let Some(item) = self.probe_archive(path).await? {
            return Ok(item.into());
        }
        if Self::is_ftp(path) {
            return Ok(self.ftp_item(path, Self::ftp_kind(path))?.into());
        }
        match LocalItem::from_path(self.ctx.clone(), path).await {
            Ok(item) => Ok(item.into()),
            Err(StorageError::NotFound(_)) => Err(StorageError::NotFound(format!("no backend claims {path}"))),
            Err(e) => Err(e),
        }
    }

    /// Resolve `path` to a file. An archive root resolves to its container file.
    pub async fn resolve_file(&self, path: &str, _cancel: &CancellationToken) -> StorageResult<Item> {
        if let Some(item) = self.probe_archive(path).await? {
            if item.is_root() {
                return item.container_file().await;
            }
            return Self::expect_kind(item.into(), ItemKind::File);
        }
        if Self::is_ftp(path) {
            return Ok(self.ftp_item(path, ItemKind::File)?.into());
        }
        Ok(LocalItem::file(self.ctx.clone(), path).await?.into())
    }

    /// Resolve `path` to a folder. An archive container resolves to its root.
    pub async fn resolve_folder(&self, path: &str, _cancel: &CancellationToken) -> StorageResult<Item> {
        if let Some(item) = self.probe_archive(path).await? {
            return Self::expect_kind(item.into(), ItemKind::Folder);
        }
        if Self::is_ftp(path) {
            return Ok(self.ftp_item(path, ItemKind::Folder)?.into());
        }
        Ok(LocalItem::folder(self.ctx.clone(), path).await?.into())
    }

    fn expect_kind(item: Item, kind: ItemKind) -> StorageResult<Item> {
        if item.kind() == kind {
            Ok(item)
        } else {
            let what = match kind {
                ItemKind::File => "file",
                ItemKind::Folder => "folder",
            };
            Err(StorageError::NotFound(format!("{} is not a {what}", item.path())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::memory::MemoryConnector;
    use std::io::Write;
    use vstore_core::path::{self as vpath};
    use vstore_core::StorageStream;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn zip_bytes() -> Vec<u8> {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("a.txt", options).unwrap();
        writer.write_all(b"hi").unwrap();
        writer.add_directory("docs/", options).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn at(dir: &std::path::Path, parts: &[&str]) -> String {
        let mut path = dir.to_string_lossy().into_owned();
        for part in parts {
            path = vpath::join(&path, part);
        }
        path
    }

    fn resolver(connector: &MemoryConnector) -> PathResolver {
        PathResolver::new(StorageContext::default()).with_connector(Arc::new(connector.clone()))
    }

    #[test]
    fn test_backend_for() {
        let resolver = resolver(&MemoryConnector::new());
        assert_eq!(resolver.backend_for(&at(std::path::Path::new("/tmp"), &["a.txt"])), BackendKind::Local);
        assert_eq!(
            resolver.backend_for(&at(std::path::Path::new("/tmp"), &["lib.zip", "a.txt"])),
            BackendKind::Archive
        );
        assert_eq!(resolver.backend_for("ftp://host/pub/a.txt"), BackendKind::Ftp);
        assert_eq!(resolver.backend_for("FTPS://host:990/"), BackendKind::Ftp);
        assert_eq!(resolver.backend_for("ftp://@host/a.txt"), BackendKind::Local);
        assert_eq!(resolver.backend_for("http://host/a.txt"), BackendKind::Local);
        assert_eq!(BackendKind::Archive.to_string(), "archive");
    }

    #[tokio::test]
    async fn test_resolve_local() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let resolver = resolver(&MemoryConnector::new());
        let cancel = CancellationToken::new();

        let file = resolver.resolve(&at(dir.path(), &["a.txt"]), &cancel).await.unwrap();
        assert_eq!(file.backend(), BackendKind::Local);
        assert!(file.is_file());

        let folder = resolver.resolve(&at(dir.path(), &[]), &cancel).await.unwrap();
        assert!(folder.is_folder());

        let err = resolver.resolve_file(&at(dir.path(), &[]), &cancel).await.unwrap_err();
        assert!(err.is_not_found());
        let err = resolver.resolve_folder(&at(dir.path(), &["a.txt"]), &cancel).await.unwrap_err();
        assert!(err.is_not_found());

        let err = resolver.resolve(&at(dir.path(), &["missing"]), &cancel).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_archive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.zip"), zip_bytes()).unwrap();
        let resolver = resolver(&MemoryConnector::new());
        let cancel = CancellationToken::new();

        let entry = resolver.resolve(&at(dir.path(), &["lib.zip", "a.txt"]), &cancel).await.unwrap();
        assert_eq!(entry.backend(), BackendKind::Archive);
        assert!(entry.is_file());

        let root = resolver.resolve(&at(dir.path(), &["lib.zip"]), &cancel).await.unwrap();
        assert_eq!(root.backend(), BackendKind::Archive);
        assert!(root.is_folder());

        let container = resolver.resolve_file(&at(dir.path(), &["lib.zip"]), &cancel).await.unwrap();
        assert_eq!(container.backend(), BackendKind::Local);

        let docs = resolver.resolve_folder(&at(dir.path(), &["lib.zip", "docs"]), &cancel).await.unwrap();
        assert!(docs.is_folder());

        let err = resolver.resolve(&at(dir.path(), &["lib.zip", "nope.txt"]), &cancel).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unclaimed_archive_marker_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("notes.zip")).unwrap();
        std::fs::write(dir.path().join("notes.zip").join("a.txt"), b"plain").unwrap();
        std::fs::write(dir.path().join("broken.zip"), b"not a zip").unwrap();
        let resolver = resolver(&MemoryConnector::new());
        let cancel = CancellationToken::new();

        let file = resolver.resolve(&at(dir.path(), &["notes.zip", "a.txt"]), &cancel).await.unwrap();
        assert_eq!(file.backend(), BackendKind::Local);

        let broken = resolver.resolve(&at(dir.path(), &["broken.zip"]), &cancel).await.unwrap();
        assert_eq!(broken.backend(), BackendKind::Local);
        assert!(broken.is_file());
    }

    #[tokio::test]
    async fn test_resolve_ftp_without_connecting() {
        let connector = MemoryConnector::new();
        let resolver = resolver(&connector);
        let cancel = CancellationToken::new();

        assert!(resolver.resolve("ftp://host/pub/", &cancel).await.unwrap().is_folder());
        assert!(resolver.resolve("ftp://host", &cancel).await.unwrap().is_folder());
        let file = resolver.resolve("ftp://host/pub/a.txt", &cancel).await.unwrap();
        assert_eq!(file.backend(), BackendKind::Ftp);
        assert!(file.is_file());
        assert!(resolver.resolve_folder("ftp://host/pub", &cancel).await.unwrap().is_folder());
        assert_eq!(connector.connections(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_archive_on_ftp() {
        let connector = MemoryConnector::new().with_dir("/pub").with_file("/pub/lib.zip", &zip_bytes());
        let resolver = resolver(&connector);
        let cancel = CancellationToken::new();

        let entry = resolver.resolve("ftp://host/pub/lib.zip/a.txt", &cancel).await.unwrap();
        assert_eq!(entry.backend(), BackendKind::Archive);
        let mut stream = entry.open_read(&cancel).await.unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), b"hi");

        let container = resolver.resolve_file("ftp://host/pub/lib.zip", &cancel).await.unwrap();
        assert_eq!(container.backend(), BackendKind::Ftp);
    }

    fn nested_zip_bytes() -> Vec<u8> {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("inner.zip", options).unwrap();
        writer.write_all(&zip_bytes()).unwrap();
        writer.start_file("fake.zip", options).unwrap();
        writer.write_all(b"just text").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_resolve_archive_inside_archive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("outer.zip"), nested_zip_bytes()).unwrap();
        let resolver = resolver(&MemoryConnector::new());
        let cancel = CancellationToken::new();

        let entry = resolver
            .resolve(&at(dir.path(), &["outer.zip", "inner.zip", "a.txt"]), &cancel)
            .await
            .unwrap();
        assert_eq!(entry.backend(), BackendKind::Archive);
        assert_eq!(entry.path(), at(dir.path(), &["outer.zip", "inner.zip", "a.txt"]));
        let mut stream = entry.open_read(&cancel).await.unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), b"hi");

        let inner = resolver.resolve(&at(dir.path(), &["outer.zip", "inner.zip"]), &cancel).await.unwrap();
        assert!(inner.is_folder());
        let container = resolver
            .resolve_file(&at(dir.path(), &["outer.zip", "inner.zip"]), &cancel)
            .await
            .unwrap();
        assert_eq!(container.backend(), BackendKind::Archive);
        assert!(container.is_file());

        let fake = resolver.resolve(&at(dir.path(), &["outer.zip", "fake.zip"]), &cancel).await.unwrap();
        assert!(fake.is_file());
        let err = resolver
            .resolve(&at(dir.path(), &["outer.zip", "inner.zip", "nope.txt"]), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
