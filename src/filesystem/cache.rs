//! In-memory metadata cache keyed by path

use super::FileMetadata;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Plain map from path to metadata. No I/O, no expiry.
///
/// Entries stay until the path is invalidated or the cache is cleared;
/// reacting to external changes is up to whoever consumes watcher events.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: HashMap<PathBuf, FileMetadata>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&FileMetadata> {
        self.entries.get(path)
    }

    pub fn put(&mut self, path: PathBuf, metadata: FileMetadata) {
        self.entries.insert(path, metadata);
    }

    /// Drop the entry for `path`, returning it if there was one
    pub fn invalidate(&mut self, path: &Path) -> Option<FileMetadata> {
        self.entries.remove(path)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata(path: &str, size: u64) -> FileMetadata {
        FileMetadata {
            path: PathBuf::from(path),
            size,
            modified_time: Utc::now(),
            mime_type: "text/plain".to_string(),
            is_hidden: false,
            is_dir: false,
        }
    }

    #[test]
    fn test_put_replaces_wholesale() {
        let mut cache = MetadataCache::new();
        cache.put(PathBuf::from("/a"), metadata("/a", 1));
        cache.put(PathBuf::from("/a"), metadata("/a", 2));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(Path::new("/a")).map(|m| m.size), Some(2));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let mut cache = MetadataCache::new();
        cache.put(PathBuf::from("/a"), metadata("/a", 1));
        cache.put(PathBuf::from("/b"), metadata("/b", 1));

        assert!(cache.invalidate(Path::new("/a")).is_some());
        assert!(cache.invalidate(Path::new("/a")).is_none());
        assert!(cache.get(Path::new("/a")).is_none());

        cache.clear();
        assert!(cache.is_empty());
    }
}
