//! HTTP client configuration and management

use super::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::llm::CompletionError;
use reqwest::Client;
use std::time::Duration;

/// Configuration for HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    /// Total timeout for plain requests. Streams are bounded per chunk by
    /// their consumer instead.
    pub request_timeout: Duration,
    pub retry_attempts: usize,
    pub retry_delay: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            user_agent: Some(format!("FilePilot/{}", crate::VERSION)),
        }
    }
}

/// Wrapper around reqwest::Client with shared configuration
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self, CompletionError> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);

        if let Some(ref user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        let client = builder.build().map_err(CompletionError::Network)?;

        Ok(Self { client, config })
    }

    /// Get the underlying reqwest client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get the client configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Get retry configuration
    pub fn retry_config(&self) -> super::retry::RetryConfig {
        super::retry::RetryConfig {
            max_attempts: self.config.retry_attempts,
            base_delay: self.config.retry_delay,
            max_delay: self.config.retry_delay * 10,
            exponential_backoff: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_overrides() {
        let config = HttpClientConfig {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            retry_attempts: 1,
            ..HttpClientConfig::default()
        };

        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(5));

        let client = HttpClient::new(config).unwrap();
        let retry = client.retry_config();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.max_delay, DEFAULT_RETRY_DELAY * 10);
    }
}
