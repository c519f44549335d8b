//! In-memory FTP server for tests

use super::client::{Download, FtpConnector, FtpEndpoint, FtpSession};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vstore_core::stream::bridge::{spawn_sink, spawn_source};
use vstore_core::stream::ByteSink;
use vstore_core::{StorageError, StorageResult};

fn key(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn missing(path: &str) -> StorageError {
    StorageError::NotFound(format!("550 {path}: No such file or directory"))
}

#[derive(Debug, Default)]
struct Server {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    stall: AtomicBool,
    connections: AtomicUsize,
}

#[derive(Debug, Clone)]
pub(crate) struct MemoryConnector {
    server: Arc<Server>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        let server = Server::default();
        server.dirs.lock().unwrap().insert("/".to_string());
        Self { server: Arc::new(server) }
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.server.dirs.lock().unwrap().insert(key(path));
        self
    }

    pub fn with_file(self, path: &str, body: &[u8]) -> Self {
        self.server.files.lock().unwrap().insert(key(path), body.to_vec());
        self
    }

    /// Connection attempts never complete.
    pub fn stalled(self) -> Self {
        self.server.stall.store(true, Ordering::SeqCst);
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.server.files.lock().unwrap().get(&key(path)).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.server.dirs.lock().unwrap().contains(&key(path))
    }

    pub fn connections(&self) -> usize {
        self.server.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FtpConnector for MemoryConnector {
    async fn connect(&self, _endpoint: &FtpEndpoint) -> StorageResult<Box<dyn FtpSession>> {
        if self.server.stall.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.server.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            server: self.server.clone(),
        }))
    }
}

struct MemorySession {
    server: Arc<Server>,
}

#[async_trait]
impl FtpSession for MemorySession {
    async fn size(&mut self, path: &str) -> StorageResult<Option<u64>> {
        let files = self.server.files.lock().unwrap();
        match files.get(&key(path)) {
            Some(body) => Ok(Some(body.len() as u64)),
            None => Err(missing(path)),
        }
    }

    async fn modified(&mut self, path: &str) -> StorageResult<Option<DateTime<Utc>>> {
        if !self.server.files.lock().unwrap().contains_key(&key(path)) {
            return Err(missing(path));
        }
        Ok(Utc.timestamp_opt(1_700_000_000, 0).single())
    }

    async fn directory_exists(&mut self, path: &str) -> StorageResult<bool> {
        Ok(self.server.dirs.lock().unwrap().contains(&key(path)))
    }

    async fn rename(&mut self, from: &str, to: &str) -> StorageResult<()> {
        let (from, to) = (key(from), key(to));
        let mut files = self.server.files.lock().unwrap();
        let mut dirs = self.server.dirs.lock().unwrap();
        if files.contains_key(&to) || dirs.contains(&to) {
            return Err(StorageError::IoFailure(format!("553 {to}: already exists")));
        }
        if let Some(body) = files.remove(&from) {
            files.insert(to, body);
            return Ok(());
        }
        if !dirs.remove(&from) {
            return Err(missing(&from));
        }
        let prefix = format!("{from}/");
        let moved: Vec<String> = files.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
        for old in moved {
            if let Some(body) = files.remove(&old) {
                files.insert(format!("{to}/{}", &old[prefix.len()..]), body);
            }
        }
        dirs.insert(to);
        Ok(())
    }

    async fn delete_file(&mut self, path: &str) -> StorageResult<()> {
        match self.server.files.lock().unwrap().remove(&key(path)) {
            Some(_) => Ok(()),
            None => Err(missing(path)),
        }
    }

    async fn delete_directory(&mut self, path: &str) -> StorageResult<()> {
        let dir = key(path);
        let prefix = format!("{dir}/");
        if self.server.files.lock().unwrap().keys().any(|k| k.starts_with(&prefix)) {
            return Err(StorageError::IoFailure(format!("550 {dir}: Directory not empty")));
        }
        if self.server.dirs.lock().unwrap().remove(&dir) {
            Ok(())
        } else {
            Err(missing(path))
        }
    }

    async fn download(self: Box<Self>, path: &str, chunk_size: usize) -> StorageResult<Download> {
        let body = self
            .server
            .files
            .lock()
            .unwrap()
            .get(&key(path))
            .cloned()
            .ok_or_else(|| missing(path))?;
        let size = Some(body.len() as u64);
        let (stream, abort) = spawn_source(chunk_size, move |sender| async move {
            for chunk in body.chunks(sender.chunk_size()) {
                sender.send(Bytes::copy_from_slice(chunk)).await?;
            }
            Ok(())
        });
        Ok(Download { stream, size, abort })
    }

    async fn upload(self: Box<Self>, path: &str) -> StorageResult<Box<dyn ByteSink>> {
        let server = self.server.clone();
        let path = key(path);
        Ok(spawn_sink(move |mut receiver| async move {
            let mut body = Vec::new();
            while let Some(chunk) = receiver.next().await? {
                body.extend_from_slice(&chunk);
            }
            server.files.lock().unwrap().insert(path, body);
            Ok(())
        }))
    }

    async fn quit(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
