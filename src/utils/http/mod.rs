//! Shared HTTP utilities for completion providers
//!
//! Client setup, retry logic, headers and status-code mapping live here so
//! provider modules only deal with their own wire format.

use crate::llm::CompletionError;
use std::time::Duration;

pub mod client;
pub mod headers;
pub mod retry;

pub use client::{HttpClient, HttpClientConfig};
pub use headers::{AnthropicHeaders, HeaderBuilder, ProviderHeaders};
pub use retry::{execute_with_retry, RetryConfig};

/// Default time allowed to establish a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default total timeout for non-streaming requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retry attempts
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;

/// Default delay between retries
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Parse standard HTTP error responses.
///
/// `retry_after` is the value of the `retry-after` header, if any; a value in
/// the body takes its place when the header is missing.
pub fn parse_http_error(status: u16, body: &str, retry_after: Option<u64>, model_name: Option<&str>) -> CompletionError {
    let message = extract_error_message(body).unwrap_or_else(|| body.to_string());
    match status {
        429 => CompletionError::RateLimit {
            retry_after: retry_after.or_else(|| extract_retry_after(body)),
        },
        401 | 403 => CompletionError::Authentication {
            message: if message.is_empty() {
                "Invalid API key or insufficient permissions".to_string()
            } else {
                message
            },
        },
        408 | 504 => CompletionError::Timeout,
        400 | 404 if body.contains("model") && (body.contains("not found") || body.contains("invalid") || body.contains("does not exist")) => {
            CompletionError::InvalidModel {
                model: model_name.unwrap_or("unknown").to_string(),
            }
        }
        _ => CompletionError::RequestFailed { status, message },
    }
}

/// Extract retry-after value from error response
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            json.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|v| v.as_u64())
        })
}

/// Pull `error.message` out of a JSON error body
fn extract_error_message(body: &str) -> Option<String> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_prefers_header() {
        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down","retry_after":9}}"#;
        assert!(matches!(
            parse_http_error(429, body, Some(3), None),
            CompletionError::RateLimit { retry_after: Some(3) }
        ));
        assert!(matches!(
            parse_http_error(429, body, None, None),
            CompletionError::RateLimit { retry_after: Some(9) }
        ));
    }

    #[test]
    fn test_status_mapping() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        assert!(matches!(
            parse_http_error(401, body, None, None),
            CompletionError::Authentication { message } if message == "invalid x-api-key"
        ));
        assert!(matches!(parse_http_error(504, "", None, None), CompletionError::Timeout));
        assert!(matches!(
            parse_http_error(404, r#"{"error":{"message":"model: not found"}}"#, None, Some("m")),
            CompletionError::InvalidModel { model } if model == "m"
        ));
        assert!(matches!(
            parse_http_error(529, "overloaded", None, None),
            CompletionError::RequestFailed { status: 529, message } if message == "overloaded"
        ));
    }
}
