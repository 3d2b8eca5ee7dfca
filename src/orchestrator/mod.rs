//! Streamed command processing against the completion provider
//!
//! A command goes through the rate limiter, gets a system prompt built from
//! the current [`ConversationContext`], and is streamed back chunk by chunk
//! over the [`EventBus`]. Commands on one orchestrator run one at a time.

use crate::context::{AiResponse, ConversationContext, ResponseMetadata};
use crate::events::{AppEvent, EventBus};
use crate::llm::{CompletionError, CompletionProvider, CompletionRequest, CompletionStream, StreamChunk, StreamCollector};
use crate::utils::errors::PilotError;
use crate::utils::rate_limit::TokenBucketLimiter;
use crate::Result;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod prompt;

pub use prompt::{build_system_prompt, DEFAULT_BASE_INSTRUCTION};

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "claude-3-opus-20240229";

/// Output token ceiling for streamed commands
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4000;

const TIMEOUT_MESSAGE: &str = "AI request timed out";

/// Tunables for a [`StreamingOrchestrator`]
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub max_output_tokens: u32,
    pub base_instruction: String,
    /// Longest gap allowed between two streamed chunks; `None` waits forever
    pub chunk_idle_timeout: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            base_instruction: DEFAULT_BASE_INSTRUCTION.to_string(),
            chunk_idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Where the current (or last) command is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    RateLimiting,
    Requesting,
    Streaming,
    Completed,
    Failed,
}

/// Drives streamed completions and owns the conversation context
pub struct StreamingOrchestrator {
    provider: Arc<dyn CompletionProvider>,
    limiter: Arc<TokenBucketLimiter>,
    bus: Arc<EventBus>,
    settings: OrchestratorSettings,
    context: RwLock<ConversationContext>,
    state: Mutex<CommandState>,
    initialized: AtomicBool,
    command_lock: tokio::sync::Mutex<()>,
}

impl StreamingOrchestrator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        limiter: Arc<TokenBucketLimiter>,
        bus: Arc<EventBus>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            provider,
            limiter,
            bus,
            settings,
            context: RwLock::new(ConversationContext::new()),
            state: Mutex::new(CommandState::Idle),
            initialized: AtomicBool::new(false),
            command_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Check the provider connection once. Later calls return immediately after a success.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        if let Err(e) = self.provider.check_connection(&self.settings.model).await {
            let err = map_completion_error(e);
            warn!("{} connection check failed: {}", self.provider.provider_name(), err);
            self.bus.publish_error(err.to_string());
            return Err(err);
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            "AI service initialized ({} / {})",
            self.provider.provider_name(),
            self.settings.model
        );
        Ok(())
    }

    /// Forget the context and require a new `initialize`
    pub async fn shutdown(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        *self.context.write().await = ConversationContext::new();
        self.set_state(CommandState::Idle);
        debug!("AI service shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Replace the context with a new workspace and selection.
    ///
    /// The last exchange is kept. The update is visible to every command
    /// started after this returns.
    pub async fn update_context(&self, workspace_path: Option<PathBuf>, selected_files: Option<Vec<PathBuf>>) {
        let mut context = self.context.write().await;
        *context = context.replaced(workspace_path, selected_files);
        debug!(
            "Context updated: workspace={:?}, {} selected",
            context.workspace_path,
            context.selected_files.len()
        );
    }

    /// Snapshot of the current context
    pub async fn context(&self) -> ConversationContext {
        self.context.read().await.clone()
    }

    pub fn state(&self) -> CommandState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Stream one command to completion
    pub async fn process_command(&self, command: &str) -> Result<AiResponse> {
        self.process_command_with_cancel(command, CancellationToken::new()).await
    }

    /// Like [`process_command`](Self::process_command), abandoned as soon as
    /// `cancel` fires. A cancelled command publishes an error and no
    /// completion event.
    pub async fn process_command_with_cancel(&self, command: &str, cancel: CancellationToken) -> Result<AiResponse> {
        if !self.is_initialized() {
            let err = PilotError::not_initialized("AI service");
            self.bus.publish_error(err.to_string());
            return Err(err);
        }

        let _running = self.command_lock.lock().await;
        match self.run_command(command, &cancel).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.set_state(CommandState::Failed);
                warn!("Command failed [{}]: {}", e.category(), e);
                self.bus.publish_error(e.to_string());
                Err(e)
            }
        }
    }

    async fn run_command(&self, command: &str, cancel: &CancellationToken) -> Result<AiResponse> {
        self.set_state(CommandState::RateLimiting);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PilotError::cancelled("AI command")),
            _ = self.limiter.acquire() => {}
        }

        let context = self.context().await;
        let request = CompletionRequest::new(
            self.settings.model.as_str(),
            build_system_prompt(&self.settings.base_instruction, &context),
            command,
            self.settings.max_output_tokens,
        );

        self.set_state(CommandState::Requesting);
        self.bus.publish(AppEvent::ResponseStarted);
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PilotError::cancelled("AI command")),
            opened = self.provider.stream_completion(&request) => opened.map_err(map_completion_error)?,
        };

        self.set_state(CommandState::Streaming);
        let mut collector = StreamCollector::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PilotError::cancelled("AI command")),
                next = self.next_chunk(&mut stream) => next?,
            };
            let Some(chunk) = next else {
                break;
            };

            collector.process_chunk(&chunk);
            if let Some(text) = chunk.content.filter(|text| !text.is_empty()) {
                self.bus.publish(AppEvent::ResponseChunk(text));
            }
            if chunk.finish_reason.is_some() {
                break;
            }
        }
        drop(stream);

        let reported_output_tokens = collector.usage().map(|usage| usage.completion_tokens);
        let content = collector.into_response().content;

        let snapshot = {
            let mut context = self.context.write().await;
            context.record_exchange(command, &content);
            context.clone()
        };
        let metadata = ResponseMetadata::new(self.settings.model.as_str(), &content, reported_output_tokens);
        let response = AiResponse::new(content, snapshot, metadata);

        self.set_state(CommandState::Completed);
        debug!(
            "Command complete: {} words, request {}",
            response.metadata().tokens_used,
            response.metadata().request_id
        );
        self.bus.publish(AppEvent::ResponseComplete(response.clone()));
        Ok(response)
    }

    async fn next_chunk(&self, stream: &mut CompletionStream) -> Result<Option<StreamChunk>> {
        let next = match self.settings.chunk_idle_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.next())
                .await
                .map_err(|_| PilotError::connection(TIMEOUT_MESSAGE))?,
            None => stream.next().await,
        };
        next.transpose().map_err(map_completion_error)
    }

    fn set_state(&self, next: CommandState) {
        match self.state.lock() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// Translate transport failures into the error taxonomy callers see
pub fn map_completion_error(error: CompletionError) -> PilotError {
    match error {
        CompletionError::Timeout => PilotError::connection(TIMEOUT_MESSAGE),
        CompletionError::RateLimit { retry_after } => PilotError::rate_limited(retry_after),
        CompletionError::Unknown { .. } => PilotError::Completion(error),
        other => PilotError::connection(format!("AI API error: {}", other)),
    }
}
