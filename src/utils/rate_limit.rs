//! Token bucket rate limiting for outbound requests
//!
//! The bucket holds at most `capacity` tokens and refills continuously at
//! `capacity` tokens per wall-clock minute. Refill only happens once the
//! balance has been drained, so a burst of `capacity` requests goes through
//! without any clock reads beyond the first.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Shortest sleep between refill attempts
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Rate limiter shared by every caller that talks to the completion endpoint
#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucketLimiter {
    /// Create a full bucket that allows `capacity` acquisitions per minute
    pub fn new(capacity: u32) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Alias for [`TokenBucketLimiter::new`] that reads better at call sites
    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests)
    }

    /// Maximum number of tokens the bucket can hold
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Current token balance (may be slightly negative right after a fractional acquire)
    pub async fn available(&self) -> f64 {
        self.state.lock().await.tokens
    }

    /// Take one token, suspending until the bucket has refilled enough.
    ///
    /// There is no upper bound on the wait; wrap the call in
    /// `tokio::time::timeout` if one is needed.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                if self.take(&mut state) {
                    return;
                }
                self.time_until_positive(state.tokens)
            };

            debug!("Rate limiter empty, waiting {:?} for refill", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Take one token if one is available right now
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.take(&mut state)
    }

    fn take(&self, state: &mut BucketState) -> bool {
        if state.tokens <= 0.0 {
            self.refill(state);
        }

        if state.tokens > 0.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed_minutes = now.duration_since(state.last_refill).as_secs_f64() / 60.0;
        state.tokens = (state.tokens + elapsed_minutes * self.capacity).min(self.capacity);
        state.last_refill = now;
    }

    fn time_until_positive(&self, tokens: f64) -> Duration {
        let per_second = self.capacity / 60.0;
        let deficit = (-tokens).max(0.0);
        Duration::from_secs_f64(deficit / per_second).max(MIN_WAIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::timeout;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity_is_immediate() {
        let limiter = TokenBucketLimiter::per_minute(50);

        for _ in 0..50 {
            let mut acquire = task::spawn(limiter.acquire());
            assert_ready!(acquire.poll());
        }

        let mut acquire = task::spawn(limiter.acquire());
        assert_pending!(acquire.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_proportional_to_elapsed_time() {
        let limiter = TokenBucketLimiter::per_minute(50);
        for _ in 0..50 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);

        // A tenth of a minute buys back roughly a tenth of the capacity.
        tokio::time::advance(Duration::from_secs(6)).await;
        let mut granted = 0;
        while limiter.try_acquire().await {
            granted += 1;
        }
        assert!((5..=6).contains(&granted), "granted {granted}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_next_token() {
        let limiter = TokenBucketLimiter::per_minute(60);
        for _ in 0..60 {
            limiter.acquire().await;
        }

        // The first post-burst acquire only needs a sliver of refill.
        assert!(timeout(Duration::from_millis(10), limiter.acquire()).await.is_ok());

        // The next one needs close to a full second at one token per second.
        assert!(timeout(Duration::from_millis(500), limiter.acquire()).await.is_err());
        assert!(timeout(Duration::from_secs(2), limiter.acquire()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_never_exceeds_capacity() {
        let limiter = TokenBucketLimiter::per_minute(10);
        assert!(limiter.try_acquire().await);
        for _ in 0..9 {
            assert!(limiter.try_acquire().await);
        }

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(limiter.try_acquire().await);
        assert!(limiter.available().await <= limiter.capacity() - 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquirers_do_not_double_spend() {
        let limiter = Arc::new(TokenBucketLimiter::per_minute(5));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(limiter.available().await, 0.0);
        assert!(!limiter.try_acquire().await);
    }
}
