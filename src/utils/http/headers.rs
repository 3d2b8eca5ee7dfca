//! HTTP header utilities for completion providers

use crate::llm::CompletionError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};

/// Builder for HTTP headers with provider-specific customizations
#[derive(Debug, Default)]
pub struct HeaderBuilder {
    headers: HeaderMap,
}

impl HeaderBuilder {
    /// Create a new header builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add content type JSON
    pub fn json_content_type(mut self) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self
    }

    /// Ask for a Server-Sent Events body
    pub fn accept_event_stream(mut self) -> Self {
        self.headers
            .insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        self
    }

    /// Add user agent header
    pub fn user_agent(mut self, app_name: &str) -> Self {
        let value = HeaderValue::from_str(app_name).unwrap_or_else(|_| HeaderValue::from_static("FilePilot"));
        self.headers.insert(USER_AGENT, value);
        self
    }

    /// Add custom header
    pub fn header(mut self, key: &'static str, value: &str) -> Result<Self, CompletionError> {
        let value = HeaderValue::from_str(value).map_err(|e| CompletionError::InvalidResponse {
            message: format!("Invalid value for header {}: {}", key, e),
        })?;
        self.headers.insert(HeaderName::from_static(key), value);
        Ok(self)
    }

    /// Mark a header value as sensitive so it is redacted from debug output
    pub fn secret(mut self, key: &'static str, value: &str) -> Result<Self, CompletionError> {
        let mut value = HeaderValue::from_str(value).map_err(|_| CompletionError::Authentication {
            message: format!("Credential for {} contains invalid characters", key),
        })?;
        value.set_sensitive(true);
        self.headers.insert(HeaderName::from_static(key), value);
        Ok(self)
    }

    /// Build the header map
    pub fn build(self) -> HeaderMap {
        self.headers
    }
}

/// Provider-specific header builders
pub trait ProviderHeaders {
    /// Create headers for this provider
    fn create_headers(&self, api_key: &str) -> Result<HeaderMap, CompletionError>;
}

/// Headers for the Anthropic messages API
#[derive(Debug, Clone)]
pub struct AnthropicHeaders {
    pub api_version: String,
    pub user_agent: String,
}

impl AnthropicHeaders {
    pub const DEFAULT_VERSION: &'static str = "2023-06-01";

    pub fn new() -> Self {
        Self {
            api_version: Self::DEFAULT_VERSION.to_string(),
            user_agent: format!("FilePilot/{}", crate::VERSION),
        }
    }

    pub fn with_version(mut self, api_version: String) -> Self {
        self.api_version = api_version;
        self
    }

    /// Headers for a streamed messages request
    pub fn create_stream_headers(&self, api_key: &str) -> Result<HeaderMap, CompletionError> {
        Ok(self.builder(api_key)?.accept_event_stream().build())
    }

    fn builder(&self, api_key: &str) -> Result<HeaderBuilder, CompletionError> {
        HeaderBuilder::new()
            .json_content_type()
            .user_agent(&self.user_agent)
            .secret("x-api-key", api_key)?
            .header("anthropic-version", &self.api_version)
    }
}

impl Default for AnthropicHeaders {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderHeaders for AnthropicHeaders {
    fn create_headers(&self, api_key: &str) -> Result<HeaderMap, CompletionError> {
        Ok(self.builder(api_key)?.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_builder() {
        let headers = HeaderBuilder::new()
            .json_content_type()
            .accept_event_stream()
            .user_agent("TestApp/1.0")
            .header("x-custom-header", "custom-value")
            .unwrap()
            .build();

        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get(ACCEPT).unwrap(), "text/event-stream");
        assert_eq!(headers.get(USER_AGENT).unwrap(), "TestApp/1.0");
        assert_eq!(headers.get("x-custom-header").unwrap(), "custom-value");
    }

    #[test]
    fn test_anthropic_headers() {
        let headers = AnthropicHeaders::new().create_headers("test-api-key").unwrap();

        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get("x-api-key").unwrap(), "test-api-key");
        assert!(headers.get("x-api-key").unwrap().is_sensitive());
        assert_eq!(headers.get("anthropic-version").unwrap(), "2023-06-01");
        assert!(headers.get(ACCEPT).is_none());
    }

    #[test]
    fn test_anthropic_stream_headers_accept_event_stream() {
        let headers = AnthropicHeaders::new().create_stream_headers("test-api-key").unwrap();

        assert_eq!(headers.get(ACCEPT).unwrap(), "text/event-stream");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert!(headers.get("x-api-key").unwrap().is_sensitive());
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        assert!(matches!(
            AnthropicHeaders::new().create_headers("bad\nkey"),
            Err(CompletionError::Authentication { .. })
        ));
    }
}
