//! Async file operations with a read-through metadata cache

use super::mime::UNREADABLE;
use super::{FileMetadata, GuessingClassifier, MetadataCache, MimeClassifier};
use crate::events::EventBus;
use crate::utils::errors::PilotError;
use crate::utils::path::{cache_key, ensure_directory, is_hidden, resolve_cache_key};
use crate::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, Fuse, Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::fs::{self, File, ReadDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Default chunk size for [`FileStore::read_binary`] (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Lazy listing produced by [`FileStore::list_directory`]
pub type MetadataStream<'a> = BoxStream<'a, Result<FileMetadata>>;

/// File content and metadata operations for the presentation layer.
///
/// Every failing operation publishes an error event before returning the
/// error. The cache lock is never held across an await point. Cache entries
/// are keyed by [`cache_key`], so a path and its aliases share one entry.
pub struct FileStore {
    cache: Mutex<MetadataCache>,
    classifier: Arc<dyn MimeClassifier>,
    bus: Arc<EventBus>,
    chunk_size: usize,
}

impl FileStore {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            cache: Mutex::new(MetadataCache::new()),
            classifier: Arc::new(GuessingClassifier),
            bus,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn MimeClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Metadata for `path`, from cache when possible
    pub async fn get_metadata<P: AsRef<Path>>(&self, path: P) -> Result<FileMetadata> {
        let result = self.lookup_metadata(path.as_ref()).await;
        self.report(result)
    }

    /// Whole file as text; undecodable bytes become U+FFFD
    pub async fn read_text<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        let path = path.as_ref();
        let result = fs::read(path)
            .await
            .map_err(|e| PilotError::from_io(path, e))
            .map(|bytes| match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    debug!("{} is not valid UTF-8, decoding lossily", path.display());
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            });
        self.report(result)
    }

    /// Open `path` for chunked reading. The file is opened before returning.
    pub async fn read_binary<P: AsRef<Path>>(&self, path: P) -> Result<BinaryChunks> {
        let path = path.as_ref();
        let result = File::open(path)
            .await
            .map_err(|e| PilotError::from_io(path, e))
            .map(|file| BinaryChunks::new(file, path.to_path_buf(), self.chunk_size));
        self.report(result)
    }

    /// Write `content` to `path` and drop any cached metadata for it
    pub async fn write_text<P: AsRef<Path>>(&self, path: P, content: &str, create_parent_dirs: bool) -> Result<()> {
        let path = path.as_ref();
        let result = Self::write_file(path, content, create_parent_dirs).await;
        let key = resolve_cache_key(path).await;
        self.cache().invalidate(&key);
        if result.is_ok() {
            debug!("Wrote {} bytes to {}", content.len(), path.display());
        }
        self.report(result)
    }

    /// Remove a file and its cache entry
    pub async fn delete_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let key = resolve_cache_key(path).await;
        let result = async {
            fs::symlink_metadata(path)
                .await
                .map_err(|e| PilotError::from_io(path, e))?;
            fs::remove_file(path)
                .await
                .map_err(|e| PilotError::from_io(path, e))
        }
        .await;

        if result.is_ok() {
            self.cache().invalidate(&key);
            debug!("Deleted {}", path.display());
        }
        self.report(result)
    }

    /// Lazily list the entries of a directory.
    ///
    /// Entries that vanish or cannot be inspected are logged and skipped. A
    /// failure of the directory iteration itself is yielded once and ends the
    /// stream.
    pub async fn list_directory<P: AsRef<Path>>(&self, path: P, include_hidden: bool) -> Result<MetadataStream<'_>> {
        let path = path.as_ref().to_path_buf();
        let opened = async {
            ensure_directory(&path).await?;
            fs::read_dir(&path)
                .await
                .map_err(|e| PilotError::from_io(&path, e))
        }
        .await;
        let read_dir = self.report(opened)?;

        let listing = stream::unfold(Some(read_dir), move |state: Option<ReadDir>| {
            let dir = path.clone();
            async move {
                let mut read_dir = state?;
                loop {
                    match read_dir.next_entry().await {
                        Ok(Some(entry)) => {
                            let entry_path = entry.path();
                            if !include_hidden && is_hidden(&entry_path) {
                                continue;
                            }
                            match self.lookup_metadata(&entry_path).await {
                                Ok(metadata) => return Some((Ok(metadata), Some(read_dir))),
                                Err(e) => {
                                    warn!("Skipping {}: {}", entry_path.display(), e);
                                }
                            }
                        }
                        Ok(None) => return None,
                        Err(e) => {
                            let err = PilotError::from_io(&dir, e);
                            self.bus.publish_error(err.to_string());
                            return Some((Err(err), None));
                        }
                    }
                }
            }
        });

        Ok(listing.boxed())
    }

    /// Evict one path, typically in response to a watcher event.
    ///
    /// Resolves the parent directory synchronously.
    pub fn invalidate<P: AsRef<Path>>(&self, path: P) {
        let key = cache_key(path);
        self.cache().invalidate(&key);
    }

    pub fn clear_metadata_cache(&self) {
        self.cache().clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache().len()
    }

    async fn lookup_metadata(&self, path: &Path) -> Result<FileMetadata> {
        let key = resolve_cache_key(path).await;
        let cached = self.cache().get(&key).cloned();
        if let Some(mut metadata) = cached {
            // A hit is only trusted while the path still exists.
            let exists = fs::try_exists(path)
                .await
                .map_err(|e| PilotError::from_io(path, e))?;
            if exists {
                metadata.path = path.to_path_buf();
                return Ok(metadata);
            }
            self.cache().invalidate(&key);
            return Err(PilotError::not_found(path));
        }

        let stat = fs::metadata(path)
            .await
            .map_err(|e| PilotError::from_io(path, e))?;

        let classifier = self.classifier.clone();
        let target = path.to_path_buf();
        let classified = tokio::task::spawn_blocking(move || classifier.classify(&target))
            .await
            .map_err(|e| PilotError::unknown(format!("Classifier task failed: {}", e)))?;
        let mime_type = match classified {
            Ok(mime_type) => mime_type,
            // The stat succeeded, so the entry is real even if its content is off limits
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                debug!("Cannot inspect {}, classifying as {}", path.display(), UNREADABLE);
                UNREADABLE.to_string()
            }
            Err(e) => return Err(PilotError::from_io(path, e)),
        };

        let modified_time: DateTime<Utc> = stat.modified().unwrap_or(SystemTime::UNIX_EPOCH).into();
        let metadata = FileMetadata {
            path: path.to_path_buf(),
            size: stat.len(),
            modified_time,
            mime_type,
            is_hidden: is_hidden(path),
            is_dir: stat.is_dir(),
        };

        self.cache().put(key, metadata.clone());
        Ok(metadata)
    }

    async fn write_file(path: &Path, content: &str, create_parent_dirs: bool) -> Result<()> {
        if create_parent_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| PilotError::from_io(parent, e))?;
            }
        }

        let mut file = File::create(path)
            .await
            .map_err(|e| PilotError::from_io(path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| PilotError::from_io(path, e))?;
        file.flush()
            .await
            .map_err(|e| PilotError::from_io(path, e))
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.bus.publish_error(e.to_string());
        }
        result
    }

    fn cache(&self) -> MutexGuard<'_, MetadataCache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Fixed-size chunks of one file, read in order.
///
/// Finite and single-use: once exhausted (or after an error) it only yields
/// `None`. Dropping it closes the file.
pub struct BinaryChunks {
    inner: Fuse<BoxStream<'static, Result<Vec<u8>>>>,
}

impl BinaryChunks {
    fn new(file: File, path: PathBuf, chunk_size: usize) -> Self {
        let chunks = stream::try_unfold((file, path), move |(mut file, path)| async move {
            let mut chunk = vec![0u8; chunk_size];
            let mut filled = 0;
            while filled < chunk_size {
                let read = file
                    .read(&mut chunk[filled..])
                    .await
                    .map_err(|e| PilotError::from_io(&path, e))?;
                if read == 0 {
                    break;
                }
                filled += read;
            }

            if filled == 0 {
                return Ok(None);
            }
            chunk.truncate(filled);
            Ok(Some((chunk, (file, path))))
        });

        Self {
            inner: chunks.boxed().fuse(),
        }
    }
}

impl Stream for BinaryChunks {
    type Item = Result<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
