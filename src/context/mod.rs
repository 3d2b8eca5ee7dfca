//! Conversation context and completed AI responses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Snapshot of what the user is looking at plus the last exchange.
///
/// Owned by the orchestrator. Everyone else sees clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Workspace directory being browsed
    pub workspace_path: Option<PathBuf>,
    /// Selected files in selection order
    pub selected_files: Vec<PathBuf>,
    /// Command of the last completed exchange
    pub last_command: Option<String>,
    /// Response text of the last completed exchange
    pub last_response: Option<String>,
    /// When this context was last replaced or updated
    pub timestamp: DateTime<Utc>,
}

impl ConversationContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self {
            workspace_path: None,
            selected_files: Vec::new(),
            last_command: None,
            last_response: None,
            timestamp: Utc::now(),
        }
    }

    /// Build the replacement for `self` with a new workspace and selection.
    ///
    /// The last exchange carries over; the timestamp is always fresh.
    pub fn replaced(&self, workspace_path: Option<PathBuf>, selected_files: Option<Vec<PathBuf>>) -> Self {
        Self {
            workspace_path,
            selected_files: selected_files.unwrap_or_default(),
            last_command: self.last_command.clone(),
            last_response: self.last_response.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Record a completed exchange in place
    pub fn record_exchange(&mut self, command: &str, response: &str) {
        self.last_command = Some(command.to_string());
        self.last_response = Some(response.to_string());
        self.timestamp = Utc::now();
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata attached to a completed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub request_id: Uuid,
    pub model: String,
    pub completed_at: DateTime<Utc>,
    /// Approximate, counted as whitespace-separated words
    pub tokens_used: usize,
    /// Output token count reported by the transport, when it sends one
    pub reported_output_tokens: Option<u32>,
}

impl ResponseMetadata {
    pub fn new(model: impl Into<String>, content: &str, reported_output_tokens: Option<u32>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            model: model.into(),
            completed_at: Utc::now(),
            tokens_used: content.split_whitespace().count(),
            reported_output_tokens,
        }
    }
}

/// A fully streamed response. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    content: String,
    context: ConversationContext,
    metadata: ResponseMetadata,
}

impl AiResponse {
    pub fn new(content: String, context: ConversationContext, metadata: ResponseMetadata) -> Self {
        Self {
            content,
            context,
            metadata,
        }
    }

    /// Full assembled text
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Copy of the conversation context at completion time
    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn metadata(&self) -> &ResponseMetadata {
        &self.metadata
    }
}
