//! vstore core
//!
//! The storage item contract, stream adapters, path syntax and configuration
//! shared by every vstore backend.

pub mod config;
pub mod context;
pub mod error;
pub mod item;
pub mod metadata;
pub mod operations;
pub mod path;
pub mod stream;

pub use config::StorageConfig;
pub use context::{cancellable, StorageContext};
pub use error::{StorageError, StorageResult};
pub use item::{list_all, ItemKind, ItemStream, StorageItem};
pub use metadata::{Attributes, BasicProperties};
pub use operations::{CollisionPolicy, DeleteMode, NameResolution, WriteMode};
pub use stream::{ByteStream, ContentTypedStream, StorageStream, StreamSession};
pub use tokio_util::sync::CancellationToken;
