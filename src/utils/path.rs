//! Path utilities shared by the store and the watcher

use crate::utils::errors::PilotError;
use std::path::{Path, PathBuf};

/// Whether a path follows the leading-dot hidden-file convention
pub fn is_hidden<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Make sure `path` exists and is a directory
pub async fn ensure_directory<P: AsRef<Path>>(path: P) -> Result<(), PilotError> {
    let path = path.as_ref();
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| PilotError::from_io(path, e))?;

    if !metadata.is_dir() {
        return Err(PilotError::not_a_directory(path));
    }

    Ok(())
}

/// Resolve a watch root to a stable key so `dir` and `dir/` register once
pub async fn canonical_root<P: AsRef<Path>>(path: P) -> Result<PathBuf, PilotError> {
    let path = path.as_ref();
    ensure_directory(path).await?;
    tokio::fs::canonicalize(path)
        .await
        .map_err(|e| PilotError::from_io(path, e))
}

/// Key under which metadata for `path` is cached.
///
/// The parent directory is canonicalized and the file name appended
/// unchanged, so aliases (symlinked or relative parents) share one key with
/// the paths the watcher reports, and a deleted file keeps its key. Falls
/// back to `path` itself when the parent cannot be resolved.
pub fn cache_key<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            std::fs::canonicalize(parent)
                .map(|parent| parent.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// [`cache_key`] on the blocking pool
pub async fn resolve_cache_key<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref().to_path_buf();
    let fallback = path.clone();
    tokio::task::spawn_blocking(move || cache_key(&path))
        .await
        .unwrap_or(fallback)
}
