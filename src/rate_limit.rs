//! Token-bucket limiter for language-model calls.
//!
//! The bucket holds up to `burst` permits and refills at
//! `requests_per_minute`. [`RateLimiter::acquire`] waits for a permit for
//! at most `max_wait` and reports whether one was granted.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    per_second: f64,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                refilled_at: Instant::now(),
            }),
            capacity,
            per_second: f64::from(requests_per_minute.max(1)) / 60.0,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_minute, config.burst)
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a permit if one is available now. On failure returns how long
    /// until the next permit.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_second))
        }
    }

    /// Wait up to `max_wait` for a permit.
    pub async fn acquire(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            let wait = match self.try_acquire() {
                Ok(()) => return true,
                Err(wait) => wait,
            };
            let now = Instant::now();
            if now >= deadline || now + wait > deadline {
                return false;
            }
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_deny() {
        let limiter = RateLimiter::new(60, 3);
        for _ in 0..3 {
            assert!(limiter.try_acquire().is_ok());
        }
        let wait = limiter.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_acquire_gives_up_after_max_wait() {
        // One permit per minute: the second caller cannot be served in 10ms.
        let limiter = RateLimiter::new(1, 1);
        assert!(limiter.acquire(Duration::from_millis(10)).await);
        assert!(!limiter.acquire(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        // 6000/min refills one permit every 10ms.
        let limiter = RateLimiter::new(6000, 1);
        assert!(limiter.acquire(Duration::ZERO).await);
        assert!(limiter.acquire(Duration::from_millis(500)).await);
    }
}
