//! Anthropic messages API provider with SSE streaming

use super::streaming::{CompletionStream, SseEvent, SseParser, StreamChunk};
use super::{CompletionError, CompletionProvider, CompletionRequest, TokenUsage};
use crate::utils::errors::{ConfigError, PilotError};
use crate::utils::http::headers::{AnthropicHeaders, ProviderHeaders};
use crate::utils::http::{execute_with_retry, parse_http_error, HttpClient, HttpClientConfig};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::header::RETRY_AFTER;
use reqwest::Response;
use serde_json::{json, Value};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

const CHECK_MAX_TOKENS: u32 = 10;
const CHECK_MESSAGE: &str = "Test connection";

/// Streams completions from the Anthropic messages endpoint
pub struct AnthropicProvider {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
    headers_provider: AnthropicHeaders,
}

impl AnthropicProvider {
    /// Create a provider with default client settings
    pub fn new<S: Into<String>>(api_key: S) -> crate::Result<Self> {
        Self::with_config(api_key, None, None)
    }

    /// Create a provider with a custom base URL and client configuration
    pub fn with_config<S: Into<String>>(
        api_key: S,
        base_url: Option<String>,
        client_config: Option<HttpClientConfig>,
    ) -> crate::Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(PilotError::Config(ConfigError::MissingKey {
                key: "provider.api_key".to_string(),
            }));
        }

        let http_client = HttpClient::new(client_config.unwrap_or_default())?;

        Ok(Self {
            http_client,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            headers_provider: AnthropicHeaders::new(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url.trim_end_matches('/'))
    }

    async fn check_status(response: Response, model: &str) -> Result<Response, CompletionError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Err(parse_http_error(status, &body, retry_after, Some(model)))
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    async fn check_connection(&self, model: &str) -> Result<(), CompletionError> {
        let headers = self.headers_provider.create_headers(&self.api_key)?;
        let url = self.messages_url();
        let timeout = self.http_client.config().request_timeout;
        let body = json!({
            "model": model,
            "max_tokens": CHECK_MAX_TOKENS,
            "messages": [{"role": "user", "content": CHECK_MESSAGE}],
        });

        let operation = || {
            let request = self
                .http_client
                .client()
                .post(&url)
                .headers(headers.clone())
                .timeout(timeout)
                .json(&body);
            async move {
                let response = request.send().await?;
                Self::check_status(response, model).await.map(|_| ())
            }
        };

        execute_with_retry(operation, &self.http_client.retry_config()).await?;
        debug!("Connection check against {} succeeded for {}", url, model);
        Ok(())
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<CompletionStream, CompletionError> {
        let headers = self.headers_provider.create_stream_headers(&self.api_key)?;
        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": [{"role": "user", "content": request.user}],
            "stream": request.stream,
        });

        let response = self
            .http_client
            .client()
            .post(self.messages_url())
            .headers(headers)
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response, &request.model).await?;
        debug!("Opened completion stream for {}", request.model);

        Ok(decode_stream(response.bytes_stream()))
    }
}

/// Turns the SSE event sequence of one message into stream chunks
#[derive(Debug, Default)]
struct EventDecoder {
    usage: TokenUsage,
    stop_reason: Option<String>,
}

impl EventDecoder {
    fn decode(&mut self, event: &SseEvent) -> Result<Option<StreamChunk>, CompletionError> {
        if event.data == "[DONE]" {
            return Ok(None);
        }

        let payload: Value = serde_json::from_str(&event.data)?;
        let kind = payload["type"]
            .as_str()
            .or(event.event_type.as_deref())
            .unwrap_or_default();
        trace!("SSE event {}", kind);

        match kind {
            "content_block_delta" => {
                let delta = &payload["delta"];
                if delta["type"] == "text_delta" {
                    let text = delta["text"].as_str().unwrap_or_default();
                    Ok(Some(StreamChunk::content(text)))
                } else {
                    Ok(None)
                }
            }
            "message_start" => {
                let usage = &payload["message"]["usage"];
                self.usage = TokenUsage::new(
                    usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                    usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                );
                Ok(Some(StreamChunk::usage(self.usage.clone())))
            }
            "message_delta" => {
                if let Some(reason) = payload["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                match payload["usage"]["output_tokens"].as_u64() {
                    Some(output) => {
                        self.usage = TokenUsage::new(self.usage.prompt_tokens, output as u32);
                        Ok(Some(StreamChunk::usage(self.usage.clone())))
                    }
                    None => Ok(None),
                }
            }
            "message_stop" => Ok(Some(StreamChunk::finish(
                self.stop_reason.take().unwrap_or_else(|| "end_turn".to_string()),
                Some(self.usage.clone()),
            ))),
            "error" => Err(stream_error(&payload["error"])),
            _ => Ok(None),
        }
    }
}

fn stream_error(error: &Value) -> CompletionError {
    let message = error["message"].as_str().unwrap_or("unknown stream error").to_string();
    match error["type"].as_str().unwrap_or_default() {
        "rate_limit_error" => CompletionError::RateLimit { retry_after: None },
        "authentication_error" | "permission_error" => CompletionError::Authentication { message },
        "overloaded_error" => CompletionError::RequestFailed { status: 529, message },
        "api_error" => CompletionError::RequestFailed { status: 500, message },
        _ => CompletionError::InvalidResponse { message },
    }
}

struct DecodeState<B> {
    bytes: BoxStream<'static, Result<B, CompletionError>>,
    parser: SseParser,
    decoder: EventDecoder,
    pending: VecDeque<Result<StreamChunk, CompletionError>>,
    done: bool,
}

impl<B> DecodeState<B> {
    fn absorb(&mut self, events: impl IntoIterator<Item = SseEvent>) {
        for event in events {
            if self.done {
                break;
            }
            match self.decoder.decode(&event) {
                Ok(Some(chunk)) => {
                    let last = chunk.is_final();
                    self.pending.push_back(Ok(chunk));
                    self.done = last;
                }
                Ok(None) => {}
                Err(e) => self.fail(e),
            }
        }
    }

    fn fail(&mut self, error: CompletionError) {
        self.pending.push_back(Err(error));
        self.done = true;
    }
}

/// Decode a raw SSE byte stream into chunks.
///
/// The result ends after `message_stop` or the first error. A body that ends
/// before `message_stop` yields an error.
fn decode_stream<S, B, E>(bytes: S) -> CompletionStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<CompletionError> + 'static,
{
    let state = DecodeState {
        bytes: bytes.map_err(Into::into).boxed(),
        parser: SseParser::new(),
        decoder: EventDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    let events = state.parser.parse(bytes.as_ref());
                    state.absorb(events);
                }
                Some(Err(e)) => state.fail(e),
                None => {
                    let tail = state.parser.finish();
                    state.absorb(tail);
                    if !state.done {
                        state.fail(CompletionError::InvalidResponse {
                            message: "Stream ended before message_stop".to_string(),
                        });
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StreamCollector;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TRANSCRIPT: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":25,\"output_tokens\":1}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: ping\n",
        "data: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo, \"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"world\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    fn pieces(text: &str, size: usize) -> Vec<Result<Vec<u8>, CompletionError>> {
        text.as_bytes().chunks(size).map(|c| Ok(c.to_vec())).collect()
    }

    fn texts(chunks: &[StreamChunk]) -> Vec<String> {
        chunks.iter().filter_map(|c| c.content.clone()).collect()
    }

    #[tokio::test]
    async fn test_decode_preserves_order_across_splits() {
        for size in [1, 7, 64, TRANSCRIPT.len()] {
            let chunks: Vec<StreamChunk> = decode_stream(stream::iter(pieces(TRANSCRIPT, size)))
                .try_collect()
                .await
                .unwrap();

            assert_eq!(texts(&chunks), vec!["Hel", "lo, ", "world"], "split size {}", size);
            let last = chunks.last().unwrap();
            assert_eq!(last.finish_reason.as_deref(), Some("end_turn"));
            assert_eq!(last.usage, Some(TokenUsage::new(25, 3)));
        }
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let cut = TRANSCRIPT.find("event: message_delta").unwrap();
        let results: Vec<_> = decode_stream(stream::iter(pieces(&TRANSCRIPT[..cut], 32)))
            .collect()
            .await;

        assert!(matches!(
            results.last(),
            Some(Err(CompletionError::InvalidResponse { .. }))
        ));
        let delivered: Vec<StreamChunk> = results.into_iter().filter_map(Result::ok).collect();
        assert_eq!(texts(&delivered), vec!["Hel", "lo, ", "world"]);
    }

    #[tokio::test]
    async fn test_error_event_mapping() {
        let body = concat!(
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"partial\"}}\n\n",
            "event: error\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"rate_limit_error\",\"message\":\"Too many requests\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"never\"}}\n\n",
        );
        let results: Vec<_> = decode_stream(stream::iter(pieces(body, 16))).collect().await;

        assert_eq!(results.len(), 2);
        assert!(matches!(&results[0], Ok(chunk) if chunk.content.as_deref() == Some("partial")));
        assert!(matches!(results[1], Err(CompletionError::RateLimit { retry_after: None })));
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(matches!(
            AnthropicProvider::new("  "),
            Err(PilotError::Config(ConfigError::MissingKey { .. }))
        ));
    }

    /// Serve one canned HTTP response after reading the full request
    async fn serve_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap()))
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn provider(base_url: String) -> AnthropicProvider {
        let config = HttpClientConfig {
            retry_attempts: 0,
            request_timeout: Duration::from_secs(5),
            ..HttpClientConfig::default()
        };
        AnthropicProvider::with_config("test-key", Some(base_url), Some(config)).unwrap()
    }

    #[tokio::test]
    async fn test_stream_completion_over_http() {
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{}",
            TRANSCRIPT
        );
        let provider = provider(serve_once(response).await);
        let request = CompletionRequest::new("claude-test", "system", "hi", 100);

        let mut stream = provider.stream_completion(&request).await.unwrap();
        let mut collector = StreamCollector::new();
        while let Some(chunk) = stream.next().await {
            collector.process_chunk(&chunk.unwrap());
        }
        assert_eq!(collector.into_response().content, "Hello, world");
    }

    #[tokio::test]
    async fn test_http_rate_limit_carries_retry_after() {
        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#;
        let response = format!(
            "HTTP/1.1 429 Too Many Requests\r\ncontent-type: application/json\r\nretry-after: 12\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let provider = provider(serve_once(response).await);
        let request = CompletionRequest::new("claude-test", "system", "hi", 100);

        assert!(matches!(
            provider.stream_completion(&request).await,
            Err(CompletionError::RateLimit { retry_after: Some(12) })
        ));
    }
}
