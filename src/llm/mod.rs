//! Completion provider abstraction and the shipped HTTP implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod anthropic;
pub mod streaming;

pub use anthropic::AnthropicProvider;
pub use streaming::{CompletionStream, SseEvent, SseParser, StreamChunk, StreamCollector};

/// Error types for completion transport
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Rate limit exceeded: {retry_after:?}")]
    RateLimit { retry_after: Option<u64> },

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid model: {model}")]
    InvalidModel { model: String },

    #[error("Request failed: {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Invalid response format: {message}")]
    InvalidResponse { message: String },

    #[error("Network error: {0}")]
    Network(reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl From<reqwest::Error> for CompletionError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            CompletionError::Timeout
        } else {
            CompletionError::Network(error)
        }
    }
}

/// One streamed completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    /// System prompt carrying the conversation context
    pub system: String,
    /// The user's command
    pub user: String,
    pub max_tokens: u32,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new<M, S, U>(model: M, system: S, user: U, max_tokens: u32) -> Self
    where
        M: Into<String>,
        S: Into<String>,
        U: Into<String>,
    {
        Self {
            model: model.into(),
            system: system.into(),
            user: user.into(),
            max_tokens,
            stream: true,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A fully collected completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: String,
    pub usage: Option<TokenUsage>,
}

/// A remote endpoint that streams completions.
///
/// The orchestrator only ever talks to this trait; wire formats stay inside
/// the implementing module.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short provider name used in logs (e.g. "anthropic")
    fn provider_name(&self) -> &str;

    /// Minimal request proving the endpoint and credential work
    async fn check_connection(&self, model: &str) -> Result<(), CompletionError>;

    /// Open a streaming completion. Chunks arrive in order; the stream ends
    /// after the final chunk.
    async fn stream_completion(&self, request: &CompletionRequest) -> Result<CompletionStream, CompletionError>;
}
