//! Storage configuration
//!
//! Loaded from TOML. Every section has defaults, so an empty file (or no file
//! at all) yields a working configuration.

use crate::error::{StorageError, StorageResult};
use crate::path::archive::{normalize_extension, DEFAULT_EXTENSIONS};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub archive: ArchiveConfig,
    pub ftp: FtpConfig,
    pub streams: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Extensions that mark a path segment as an archive container
    pub extensions: Vec<String>,
    /// Compression used for entries written by this layer
    pub compression: ArchiveCompression,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            compression: ArchiveCompression::Deflated,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCompression {
    Stored,
    #[default]
    Deflated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    pub connect_timeout_secs: u64,
    pub anonymous_user: String,
    pub anonymous_password: String,
    pub credentials: Vec<FtpCredential>,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            anonymous_user: "anonymous".to_string(),
            anonymous_password: "anonymous@".to_string(),
            credentials: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtpCredential {
    pub host: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Chunk size for transfers between blocking codecs and async streams
    pub chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { chunk_size: 64 * 1024 }
    }
}

impl FtpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Credentials for `host`: exact host+user match, then host only, then anonymous.
    pub fn credentials_for(&self, host: &str, user: Option<&str>) -> (String, String) {
        let host_matches = |c: &&FtpCredential| c.host.eq_ignore_ascii_case(host);

        if let Some(user) = user {
            if let Some(cred) = self
                .credentials
                .iter()
                .filter(host_matches)
                .find(|c| c.username == user)
            {
                return (cred.username.clone(), cred.password.clone());
            }
            return (user.to_string(), String::new());
        }

        match self.credentials.iter().find(host_matches) {
            Some(cred) => (cred.username.clone(), cred.password.clone()),
            None => (self.anonymous_user.clone(), self.anonymous_password.clone()),
        }
    }
}

impl StorageConfig {
    pub fn from_toml_str(input: &str) -> StorageResult<Self> {
        let config: StorageConfig =
            toml::from_str(input).map_err(|e| StorageError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> StorageResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// `<config dir>/vstore/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "vstore", "vstore").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the default config file if present; fall back to defaults otherwise.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring unreadable config: {e}");
                Self::default()
            }
        }
    }

    pub fn to_toml_string(&self) -> StorageResult<String> {
        toml::to_string_pretty(self).map_err(|e| StorageError::InvalidConfig(e.to_string()))
    }

    /// Archive extensions, normalized to lowercase with a leading dot
    pub fn archive_extensions(&self) -> Vec<String> {
        self.archive.extensions.iter().map(|e| normalize_extension(e)).collect()
    }

    fn validate(&self) -> StorageResult<()> {
        if self.streams.chunk_size == 0 {
            return Err(StorageError::InvalidConfig("streams.chunk_size must be positive".into()));
        }
        if let Some(bad) = self.archive.extensions.iter().find(|e| normalize_extension(e).len() < 2) {
            return Err(StorageError::InvalidConfig(format!("invalid archive extension {bad:?}")));
        }
        Ok(())
    }
}
