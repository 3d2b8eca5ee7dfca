//! FilePilot - an AI-assisted file manager core
//!
//! This library provides cached and event-publishing file operations, a
//! filesystem watcher, and a streaming AI assistant that tracks the
//! conversation context, all connected through one event bus.

pub mod config;
pub mod context;
pub mod events;
pub mod filesystem;
pub mod llm;
pub mod orchestrator;
pub mod services;
pub mod utils;

// Re-export commonly used types and traits
pub use config::{ApiKeyResolver, Config, ConfigManager};
pub use context::{AiResponse, ConversationContext, ResponseMetadata};
pub use events::{AppEvent, EventBus, EventKind, SubscriptionId};
pub use filesystem::{FileMetadata, FileStore, FilesystemWatcher, MetadataCache};
pub use llm::{AnthropicProvider, CompletionError, CompletionProvider, CompletionRequest};
pub use orchestrator::{CommandState, OrchestratorSettings, StreamingOrchestrator};
pub use services::Services;
pub use utils::errors::{ConfigError, PilotError};
pub use utils::rate_limit::TokenBucketLimiter;

/// The main result type used throughout the application
pub type Result<T> = std::result::Result<T, PilotError>;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FilePilot";
