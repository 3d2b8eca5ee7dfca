//! Retry logic for HTTP operations

use crate::llm::CompletionError;
use std::time::Duration;
use tracing::debug;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(240),
            exponential_backoff: true,
        }
    }
}

/// Execute an operation with retry logic.
///
/// `max_attempts` counts retries, so the operation runs at most
/// `max_attempts + 1` times.
pub async fn execute_with_retry<F, Fut, T>(operation: F, config: &RetryConfig) -> Result<T, CompletionError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, CompletionError>> + Send,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= config.max_attempts || !is_retryable_error(&error) {
                    return Err(error);
                }
                let delay = calculate_delay(&error, attempt, config);
                debug!("Attempt {} failed ({}), retrying in {:?}", attempt + 1, error, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Check if an error is retryable
pub fn is_retryable_error(error: &CompletionError) -> bool {
    match error {
        CompletionError::RateLimit { .. } => true,
        CompletionError::Network(_) | CompletionError::Timeout => true,
        CompletionError::RequestFailed { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Calculate delay for retry attempt
fn calculate_delay(error: &CompletionError, attempt: usize, config: &RetryConfig) -> Duration {
    match error {
        CompletionError::RateLimit { retry_after: Some(retry_after) } => Duration::from_secs(*retry_after),
        _ if config.exponential_backoff => calculate_exponential_delay(attempt, config),
        _ => config.base_delay,
    }
}

/// Calculate exponential backoff delay
fn calculate_exponential_delay(attempt: usize, config: &RetryConfig) -> Duration {
    let exponential_delay = config.base_delay.saturating_mul(2_u32.saturating_pow(attempt as u32));
    std::cmp::min(exponential_delay, config.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: usize) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(240),
            exponential_backoff: false,
        }
    }

    #[tokio::test]
    async fn test_retry_success_after_failure() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = attempt_count.clone();

        let operation = move || {
            let count = attempt_count_clone.clone();
            async move {
                let current = count.fetch_add(1, Ordering::SeqCst);
                if current < 2 {
                    Err(CompletionError::RequestFailed {
                        status: 500,
                        message: "test server error".to_string(),
                    })
                } else {
                    Ok("success".to_string())
                }
            }
        };

        let result = execute_with_retry(operation, &fast_config(3)).await;
        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = attempt_count.clone();

        let operation = move || {
            let count = attempt_count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(CompletionError::Timeout)
            }
        };

        let result = execute_with_retry(operation, &fast_config(2)).await;
        assert!(matches!(result, Err(CompletionError::Timeout)));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = attempt_count.clone();

        let operation = move || {
            let count = attempt_count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(CompletionError::Authentication {
                    message: "invalid key".to_string(),
                })
            }
        };

        let result = execute_with_retry(operation, &fast_config(3)).await;
        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_honours_retry_after() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = attempt_count.clone();
        let started = tokio::time::Instant::now();

        let operation = move || {
            let count = attempt_count_clone.clone();
            async move {
                if count.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CompletionError::RateLimit { retry_after: Some(7) })
                } else {
                    Ok(())
                }
            }
        };

        execute_with_retry(operation, &fast_config(1)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(7));
    }
}
