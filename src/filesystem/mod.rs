//! Workspace file access, metadata caching and change monitoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod cache;
pub mod mime;
pub mod store;
pub mod watcher;

pub use cache::MetadataCache;
pub use mime::{GuessingClassifier, MimeClassifier};
pub use store::{BinaryChunks, FileStore, DEFAULT_CHUNK_SIZE};
pub use watcher::FilesystemWatcher;

/// Metadata about one path. Replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Path the metadata was looked up under
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified_time: DateTime<Utc>,
    /// Content classification, e.g. `text/plain`
    pub mime_type: String,
    /// File name starts with a dot
    pub is_hidden: bool,
    pub is_dir: bool,
}
