//! vstore storage backends
//!
//! - `local` - host filesystem passthrough
//! - `archive` - zip containers, addressed as folders
//! - `ftp` - FTP servers through a pluggable client seam
//!
//! [`Item`] ties them together behind the `StorageItem` contract, and
//! [`PathResolver`] builds the right variant from a path string.

pub mod archive;
pub mod ftp;
pub mod item;
pub mod local;
pub mod resolver;
pub mod transfer;

pub use archive::ArchiveItem;
pub use ftp::{FtpConnector, FtpItem};
pub use item::Item;
pub use local::LocalItem;
pub use resolver::{BackendKind, PathResolver};
