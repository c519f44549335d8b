//! Blocking zip access. Everything here runs on the blocking pool.

use bytes::Bytes;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use vstore_core::config::ArchiveCompression;
use vstore_core::path::archive::normalize_entry_name;
use vstore_core::stream::bridge::ChunkSender;
use vstore_core::{ItemKind, StorageError, StorageResult};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Where the container bytes come from
#[derive(Debug, Clone)]
pub(crate) enum ContainerSource {
    File(PathBuf),
    /// Container fetched in full through a backing item
    Memory(Bytes),
}

#[derive(Debug)]
pub(crate) enum ContainerReader {
    File(File),
    Memory(Cursor<Bytes>),
}

impl Read for ContainerReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ContainerReader::File(file) => file.read(buf),
            ContainerReader::Memory(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for ContainerReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            ContainerReader::File(file) => file.seek(pos),
            ContainerReader::Memory(cursor) => cursor.seek(pos),
        }
    }
}

pub(crate) type Archive = ZipArchive<ContainerReader>;

impl ContainerSource {
    fn describe(&self) -> String {
        match self {
            ContainerSource::File(path) => path.display().to_string(),
            ContainerSource::Memory(bytes) => format!("<{} byte container>", bytes.len()),
        }
    }

    /// Open the container. Anything that keeps it from being read as a zip is
    /// `Unavailable`.
    pub(crate) fn open(&self) -> StorageResult<Archive> {
        let reader = match self {
            ContainerSource::File(path) => ContainerReader::File(
                File::open(path).map_err(|e| StorageError::Unavailable(format!("{}: {e}", path.display())))?,
            ),
            ContainerSource::Memory(bytes) => ContainerReader::Memory(Cursor::new(bytes.clone())),
        };
        ZipArchive::new(reader).map_err(|e| StorageError::Unavailable(format!("{}: {e}", self.describe())))
    }
}

pub(crate) fn codec_error(err: ZipError) -> StorageError {
    match err {
        ZipError::Io(e) => StorageError::from(e),
        ZipError::FileNotFound => StorageError::NotFound("archive entry".into()),
        other => StorageError::IoFailure(other.to_string()),
    }
}

/// One entry of the central directory, with its name normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryInfo {
    pub index: usize,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl EntryInfo {
    pub fn kind(&self) -> ItemKind {
        if self.is_dir {
            ItemKind::Folder
        } else {
            ItemKind::File
        }
    }
}

/// Central directory listing plus the raw names that were skipped as unsafe
pub(crate) struct Index {
    pub entries: Vec<EntryInfo>,
    pub skipped: Vec<String>,
}

pub(crate) fn read_index(archive: &mut Archive) -> StorageResult<Index> {
    let mut entries = Vec::with_capacity(archive.len());
    let mut skipped = Vec::new();
    for index in 0..archive.len() {
        let file = archive.by_index_raw(index).map_err(codec_error)?;
        let Some(name) = normalize_entry_name(file.name()) else {
            skipped.push(file.name().to_string());
            continue;
        };
        let modified: Option<zip::DateTime> = file.last_modified().into();
        entries.push(EntryInfo {
            index,
            name,
            is_dir: file.is_dir(),
            size: file.size(),
            modified: modified.and_then(to_chrono),
        });
    }
    Ok(Index { entries, skipped })
}

fn to_chrono(dt: zip::DateTime) -> Option<DateTime<Utc>> {
    let naive = chrono::NaiveDate::from_ymd_opt(dt.year().into(), dt.month().into(), dt.day().into())?
        .and_hms_opt(dt.hour().into(), dt.minute().into(), dt.second().into())?;
    Some(Utc.from_utc_datetime(&naive))
}

fn to_zip_time(dt: DateTime<Utc>) -> Option<zip::DateTime> {
    zip::DateTime::from_date_and_time(
        u16::try_from(dt.year()).ok()?,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    )
    .ok()
}

/// Stream the decompressed bytes of entry `index` to `sender`.
pub(crate) fn copy_entry(archive: &mut Archive, index: usize, sender: &ChunkSender) -> StorageResult<u64> {
    let mut file = archive.by_index(index).map_err(codec_error)?;
    sender.copy_from(&mut file)
}

pub(crate) fn read_entry(archive: &mut Archive, index: usize) -> StorageResult<Vec<u8>> {
    let mut file = archive.by_index(index).map_err(codec_error)?;
    let mut body = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
    file.read_to_end(&mut body)?;
    Ok(body)
}

pub(crate) enum Addition {
    File { name: String, body: Bytes },
    Folder { name: String },
}

/// Changes applied by one container rebuild
#[derive(Default)]
pub(crate) struct Rewrite {
    /// Entry index to its new raw name, or `None` to drop it
    pub remap: HashMap<usize, Option<String>>,
    pub additions: Vec<Addition>,
}

impl Rewrite {
    pub fn drop_entries<'a>(&mut self, entries: impl IntoIterator<Item = &'a EntryInfo>) {
        for entry in entries {
            self.remap.insert(entry.index, None);
        }
    }
}

/// Rebuild the container. Untouched and renamed entries are raw copies, so
/// their compressed bytes are carried over unchanged.
pub(crate) fn rewrite(archive: &mut Archive, plan: Rewrite, compression: ArchiveCompression) -> StorageResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for index in 0..archive.len() {
        let target = plan.remap.get(&index);
        if matches!(target, Some(None)) {
            continue;
        }
        let file = archive.by_index_raw(index).map_err(codec_error)?;
        match target {
            Some(Some(name)) => writer.raw_copy_file_rename(file, name.as_str()),
            _ => writer.raw_copy_file(file),
        }
        .map_err(codec_error)?;
    }

    let method = match compression {
        ArchiveCompression::Stored => CompressionMethod::Stored,
        ArchiveCompression::Deflated => CompressionMethod::Deflated,
    };
    let mut options = SimpleFileOptions::default().compression_method(method);
    if let Some(now) = to_zip_time(Utc::now()) {
        options = options.last_modified_time(now);
    }

    for addition in plan.additions {
        match addition {
            Addition::File { name, body } => {
                writer
                    .start_file(name, options.large_file(body.len() as u64 >= u32::MAX as u64))
                    .map_err(codec_error)?;
                writer.write_all(&body)?;
            }
            Addition::Folder { name } => writer.add_directory(name, options).map_err(codec_error)?,
        }
    }

    let cursor = writer.finish().map_err(codec_error)?;
    Ok(cursor.into_inner())
}

pub(crate) fn empty_container() -> StorageResult<Vec<u8>> {
    let writer = ZipWriter::new(Cursor::new(Vec::new()));
    Ok(writer.finish().map_err(codec_error)?.into_inner())
}

/// A direct child of a folder inside the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Child<'a> {
    pub name: String,
    pub kind: ItemKind,
    /// `None` for synthetic folders
    pub entry: Option<&'a EntryInfo>,
}

/// Immediate children of `folder` (`""` for the root), with synthetic
/// folders for deeper entries. Order follows the central directory.
pub(crate) fn children<'a>(entries: &'a [EntryInfo], folder: &str) -> Vec<Child<'a>> {
    let prefix = if folder.is_empty() { String::new() } else { format!("{folder}/") };
    let mut out: Vec<Child<'a>> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        let Some(rest) = entry.name.strip_prefix(prefix.as_str()) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let (name, kind, own) = match rest.split_once('/') {
            Some((first, _)) => (first, ItemKind::Folder, None),
            None => (rest, entry.kind(), Some(entry)),
        };
        match seen.get(name) {
            Some(&slot) => {
                // an explicit directory entry upgrades an earlier synthetic one
                if out[slot].entry.is_none() && kind == ItemKind::Folder && own.is_some() {
                    out[slot].entry = own;
                }
            }
            None => {
                seen.insert(name.to_string(), out.len());
                out.push(Child {
                    name: name.to_string(),
                    kind,
                    entry: own,
                });
            }
        }
    }
    out
}

/// Kind of the item at `name`, and its own entry when it has one.
pub(crate) fn lookup<'a>(entries: &'a [EntryInfo], name: &str) -> Option<(ItemKind, Option<&'a EntryInfo>)> {
    if let Some(entry) = entries.iter().find(|e| e.name == name) {
        return Some((entry.kind(), Some(entry)));
    }
    let prefix = format!("{name}/");
    entries
        .iter()
        .any(|e| e.name.starts_with(&prefix))
        .then_some((ItemKind::Folder, None))
}

/// `name` itself and everything below it
pub(crate) fn subtree<'a>(entries: &'a [EntryInfo], name: &'a str) -> impl Iterator<Item = &'a EntryInfo> + 'a {
    entries
        .iter()
        .filter(move |e| e.name == name || (e.name.starts_with(name) && e.name[name.len()..].starts_with('/')))
}

/// Raw zip name for `entry` after moving its subtree from `from` to `to`.
pub(crate) fn renamed(entry: &EntryInfo, from: &str, to: &str) -> String {
    let mut name = format!("{to}{}", &entry.name[from.len()..]);
    if entry.is_dir {
        name.push('/');
    }
    name
}

/// Parent entry name, `""` for top-level entries.
pub(crate) fn parent_entry(name: &str) -> &str {
    name.rsplit_once('/').map_or("", |(parent, _)| parent)
}

pub(crate) fn join_entry(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    }
}
