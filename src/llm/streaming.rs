//! Streaming chunk types, collection and Server-Sent Events decoding

use super::{CompletionError, CompletionResponse, TokenUsage};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Represents a chunk of streaming response data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The incremental content for this chunk
    pub content: Option<String>,
    /// Indicates if this is the final chunk
    pub finish_reason: Option<String>,
    /// Token usage information (usually only in the final chunk)
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    /// Create a new content chunk
    pub fn content<S: Into<String>>(content: S) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Create a usage-only chunk
    pub fn usage(usage: TokenUsage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }

    /// Create a final chunk with finish reason and usage
    pub fn finish<S: Into<String>>(finish_reason: S, usage: Option<TokenUsage>) -> Self {
        Self {
            content: None,
            finish_reason: Some(finish_reason.into()),
            usage,
        }
    }

    /// Check if this is a content chunk
    pub fn is_content(&self) -> bool {
        self.content.is_some()
    }

    /// Check if this is the final chunk
    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Stream of chunks from a completion
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, CompletionError>> + Send>>;

/// Utility for collecting streaming responses into a complete response
#[derive(Debug, Default)]
pub struct StreamCollector {
    content_buffer: String,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl StreamCollector {
    /// Create a new stream collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a stream chunk
    pub fn process_chunk(&mut self, chunk: &StreamChunk) {
        if let Some(content) = &chunk.content {
            self.content_buffer.push_str(content);
        }

        if let Some(finish_reason) = &chunk.finish_reason {
            self.finish_reason = Some(finish_reason.clone());
        }

        // Providers may report usage in pieces; keep the latest figure per field.
        if let Some(usage) = &chunk.usage {
            let merged = match self.usage.take() {
                Some(previous) => TokenUsage::new(
                    usage.prompt_tokens.max(previous.prompt_tokens),
                    usage.completion_tokens.max(previous.completion_tokens),
                ),
                None => usage.clone(),
            };
            self.usage = Some(merged);
        }
    }

    /// Text collected so far
    pub fn content(&self) -> &str {
        &self.content_buffer
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        self.usage.as_ref()
    }

    /// Get the final collected response
    pub fn into_response(self) -> CompletionResponse {
        CompletionResponse {
            content: self.content_buffer,
            finish_reason: self.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: self.usage,
        }
    }
}

/// Server-Sent Events (SSE) parser for streaming responses.
///
/// Fed raw network bytes, so a multi-byte character or an event may be split
/// across calls. Events end at a blank line.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse incoming bytes and extract complete SSE events
    pub fn parse(&mut self, data: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(data.iter().copied().filter(|&b| b != b'\r'));
        let mut events = Vec::new();

        while let Some(event_end) = find_blank_line(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..event_end + 2).collect();
            if let Some(event) = Self::parse_event(&String::from_utf8_lossy(&raw[..event_end])) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing event that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        let raw = std::mem::take(&mut self.buffer);
        Self::parse_event(&String::from_utf8_lossy(&raw))
    }

    fn parse_event(data: &str) -> Option<SseEvent> {
        let mut event_type = None;
        let mut event_data = String::new();
        let mut has_data = false;
        let mut event_id = None;

        for line in data.lines() {
            // Blank lines separate events; a leading colon marks a comment.
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.find(':') {
                Some(colon_pos) => {
                    let value = &line[colon_pos + 1..];
                    (&line[..colon_pos], value.strip_prefix(' ').unwrap_or(value))
                }
                None => (line, ""),
            };

            match field {
                "event" => event_type = Some(value.to_string()),
                "data" => {
                    if has_data {
                        event_data.push('\n');
                    }
                    event_data.push_str(value);
                    has_data = true;
                }
                "id" => event_id = Some(value.to_string()),
                _ => {}
            }
        }

        if has_data {
            Some(SseEvent {
                event_type,
                data: event_data,
                id: event_id,
            })
        } else {
            None
        }
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

/// Represents a Server-Sent Event
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}
