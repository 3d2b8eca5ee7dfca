//! Recursive directory monitoring that publishes file change events

use crate::events::{AppEvent, EventBus};
use crate::utils::errors::PilotError;
use crate::utils::path::canonical_root;
use crate::Result;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Default)]
struct WatchState {
    watcher: Option<RecommendedWatcher>,
    roots: BTreeSet<PathBuf>,
}

/// Owns one OS watcher and the set of roots registered with it.
///
/// Notifications arrive on notify's own thread and are translated into
/// [`AppEvent`]s there. Only file-level changes are published; directory
/// events are dropped.
pub struct FilesystemWatcher {
    bus: Arc<EventBus>,
    state: Mutex<WatchState>,
}

impl FilesystemWatcher {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            state: Mutex::new(WatchState::default()),
        }
    }

    /// Start the underlying watcher. Calling it again is a no-op.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state();
        if state.watcher.is_some() {
            return Ok(());
        }

        let bus = self.bus.clone();
        let created = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for change in translate(event) {
                        bus.publish(change);
                    }
                }
                Err(e) => {
                    warn!("Filesystem watch error: {}", e);
                    bus.publish_error(format!("Filesystem watch error: {}", e));
                }
            },
            notify::Config::default(),
        );

        match created {
            Ok(watcher) => {
                state.watcher = Some(watcher);
                info!("Filesystem watcher initialized");
                Ok(())
            }
            Err(e) => {
                // Handlers run inline and may call back into the watcher
                drop(state);
                let err = PilotError::from(e);
                self.bus.publish_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Watch `path` recursively.
    ///
    /// Fails if the path is missing or not a directory. Registering a root
    /// twice is a no-op. A failure inside the OS watch setup is published as
    /// an error event and the root stays registered.
    pub async fn start_monitoring<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let root = match canonical_root(path.as_ref()).await {
            Ok(root) => root,
            Err(e) => {
                self.bus.publish_error(e.to_string());
                return Err(e);
            }
        };

        // The lock is released before anything is published
        let setup = {
            let mut state = self.state();
            let WatchState { watcher, roots } = &mut *state;
            match watcher.as_mut() {
                None => Err(PilotError::not_initialized("Filesystem watcher")),
                Some(_) if !roots.insert(root.clone()) => {
                    debug!("Already monitoring {}", root.display());
                    return Ok(());
                }
                Some(watcher) => Ok(watcher.watch(&root, RecursiveMode::Recursive)),
            }
        };

        match setup {
            Err(err) => {
                self.bus.publish_error(err.to_string());
                Err(err)
            }
            Ok(Ok(())) => {
                info!("Monitoring {}", root.display());
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Partial watch setup for {}: {}", root.display(), e);
                self.bus
                    .publish_error(format!("Failed to watch {}: {}", root.display(), e));
                Ok(())
            }
        }
    }

    /// Stop watching exactly this root. Returns whether it was registered.
    pub async fn stop_monitoring<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        let root = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());

        let mut state = self.state();
        if !state.roots.remove(&root) {
            return false;
        }
        if let Some(watcher) = state.watcher.as_mut() {
            if let Err(e) = watcher.unwatch(&root) {
                debug!("Unwatch {} failed: {}", root.display(), e);
            }
        }
        info!("Stopped monitoring {}", root.display());
        true
    }

    /// Drop the OS watcher and every registration. Safe without `initialize`.
    pub fn shutdown(&self) {
        let mut state = self.state();
        let was_running = state.watcher.take().is_some();
        state.roots.clear();
        if was_running {
            info!("Filesystem watcher shut down");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().watcher.is_some()
    }

    pub fn watched_roots(&self) -> Vec<PathBuf> {
        self.state().roots.iter().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, WatchState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for FilesystemWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Map one notify event onto zero or more file change events
fn translate(event: Event) -> Vec<AppEvent> {
    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Create(_) => files(paths, AppEvent::FileCreated),
        EventKind::Remove(_) => paths.into_iter().map(AppEvent::FileDeleted).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => translate_rename(paths, mode),
        EventKind::Modify(_) => files(paths, AppEvent::FileModified),
        _ => Vec::new(),
    }
}

fn translate_rename(paths: Vec<PathBuf>, mode: RenameMode) -> Vec<AppEvent> {
    match mode {
        RenameMode::From => paths.into_iter().map(AppEvent::FileDeleted).collect(),
        RenameMode::To => files(paths, AppEvent::FileCreated),
        RenameMode::Both => {
            let mut paths = paths.into_iter();
            let mut events = Vec::new();
            if let Some(old) = paths.next() {
                events.push(AppEvent::FileDeleted(old));
            }
            events.extend(files(paths.collect(), AppEvent::FileCreated));
            events
        }
        // Backends that cannot pair the two halves: decide by what is on disk now.
        _ => paths
            .into_iter()
            .filter_map(|path| match path.symlink_metadata() {
                Ok(meta) if meta.is_dir() => None,
                Ok(_) => Some(AppEvent::FileCreated(path)),
                Err(_) => Some(AppEvent::FileDeleted(path)),
            })
            .collect(),
    }
}

fn files(paths: Vec<PathBuf>, make: fn(PathBuf) -> AppEvent) -> Vec<AppEvent> {
    paths.into_iter().filter(|path| !path.is_dir()).map(make).collect()
}
