//! Wiring of the core components around one event bus

use crate::config::{ApiKeyResolver, Config};
use crate::events::{AppEvent, EventBus, EventKind, SubscriptionId};
use crate::filesystem::{FileStore, FilesystemWatcher};
use crate::llm::{AnthropicProvider, CompletionProvider};
use crate::orchestrator::StreamingOrchestrator;
use crate::utils::errors::{ConfigError, PilotError};
use crate::utils::rate_limit::TokenBucketLimiter;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Every core component, sharing one [`EventBus`].
///
/// File change events from the watcher evict the matching metadata cache
/// entries. The assistant is only built when a provider is available, so
/// file operations work without an API key.
pub struct Services {
    bus: Arc<EventBus>,
    files: Arc<FileStore>,
    watcher: FilesystemWatcher,
    assistant: Option<StreamingOrchestrator>,
    provider_name: String,
    invalidation: Vec<SubscriptionId>,
}

impl Services {
    /// Build from configuration, using the HTTP provider when a key resolves
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let provider = match config.resolved_api_key() {
            Some(api_key) => {
                let provider = AnthropicProvider::with_config(
                    api_key,
                    Some(config.provider.base_url.clone()),
                    Some(config.http_client_config()),
                )?;
                Some(Arc::new(provider) as Arc<dyn CompletionProvider>)
            }
            None => {
                debug!("No API key for {}, assistant disabled", config.provider.name);
                None
            }
        };

        Ok(Self::assemble(config, provider))
    }

    /// Build with an explicit provider
    pub fn with_provider(config: &Config, provider: Arc<dyn CompletionProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, Some(provider)))
    }

    fn assemble(config: &Config, provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        let bus = Arc::new(EventBus::new());
        let files = Arc::new(FileStore::new(bus.clone()).with_chunk_size(config.filesystem.chunk_size));
        let watcher = FilesystemWatcher::new(bus.clone());

        let invalidation = EventKind::FILE_CHANGES
            .into_iter()
            .map(|kind| {
                let files = Arc::downgrade(&files);
                bus.subscribe(kind, move |event: &AppEvent| {
                    if let (Some(files), Some(path)) = (files.upgrade(), event.path()) {
                        files.invalidate(path);
                    }
                })
            })
            .collect();

        let assistant = provider.map(|provider| {
            let limiter = Arc::new(TokenBucketLimiter::per_minute(config.provider.requests_per_minute));
            StreamingOrchestrator::new(provider, limiter, bus.clone(), config.orchestrator_settings())
        });

        Self {
            bus,
            files,
            watcher,
            assistant,
            provider_name: config.provider.name.clone(),
            invalidation,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn watcher(&self) -> &FilesystemWatcher {
        &self.watcher
    }

    /// The orchestrator, or a missing-key error naming the variable to set
    pub fn assistant(&self) -> Result<&StreamingOrchestrator> {
        self.assistant.as_ref().ok_or_else(|| {
            PilotError::Config(ConfigError::MissingKey {
                key: ApiKeyResolver::env_key_name(&self.provider_name),
            })
        })
    }

    pub fn has_assistant(&self) -> bool {
        self.assistant.is_some()
    }

    /// Start the watcher and, if configured, check the assistant connection
    pub async fn start(&self) -> Result<()> {
        self.watcher.initialize()?;
        if let Some(assistant) = &self.assistant {
            assistant.initialize().await?;
        }
        info!("Services started");
        Ok(())
    }

    /// Stop watching, drop cached metadata and reset the assistant. Safe to
    /// call more than once.
    pub async fn shutdown(&self) {
        self.watcher.shutdown();
        self.files.clear_metadata_cache();
        if let Some(assistant) = &self.assistant {
            assistant.shutdown().await;
        }
        debug!("Services shut down");
    }
}

impl Drop for Services {
    fn drop(&mut self) {
        for id in self.invalidation.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_events_evict_cache_entries() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("watched.txt");
        std::fs::write(&file, "v1").unwrap();

        let services = Services::assemble(&Config::default(), None);
        runtime.block_on(services.files().get_metadata(&file)).unwrap();
        assert_eq!(services.files().cached_entries(), 1);

        services.bus().publish(AppEvent::FileModified(file));
        assert_eq!(services.files().cached_entries(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_watching_through_symlink_evicts_cached_entries() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let workspace = dir.path().join("ws");
        std::os::unix::fs::symlink(&real, &workspace).unwrap();
        let file = workspace.join("a.txt");
        std::fs::write(&file, "12345").unwrap();

        let services = Services::assemble(&Config::default(), None);
        services.start().await.unwrap();
        services.watcher().start_monitoring(&workspace).await.unwrap();
        assert_eq!(services.files().get_metadata(&file).await.unwrap().size, 5);

        std::fs::write(&file, "1234567890").unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while services.files().cached_entries() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("cache entry not evicted within 5s");

        assert_eq!(services.files().get_metadata(&file).await.unwrap().size, 10);
        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_clears_metadata_cache() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("kept.txt");
        std::fs::write(&file, "x").unwrap();

        let services = Services::assemble(&Config::default(), None);
        services.files().get_metadata(&file).await.unwrap();
        assert_eq!(services.files().cached_entries(), 1);

        services.shutdown().await;
        assert_eq!(services.files().cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_assistant_requires_key() {
        let mut config = Config::default();
        config.provider.name = "filepilot_services_test".to_string();
        let services = Services::new(&config).unwrap();

        assert!(!services.has_assistant());
        assert!(matches!(
            services.assistant(),
            Err(PilotError::Config(ConfigError::MissingKey { key })) if key == "FILEPILOT_SERVICES_TEST_API_KEY"
        ));

        services.start().await.unwrap();
        assert!(services.watcher().is_running());
        services.shutdown().await;
        assert!(!services.watcher().is_running());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.provider.requests_per_minute = 0;
        assert!(Services::new(&config).is_err());
    }
}
