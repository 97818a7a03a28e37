//! A coordinator-wide token bucket gates the poll loop. The real
//! coordinator is out of scope; this is the minimal bucket a single syncer
//! consults, with a 100 ms sleep-on-trip.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    inner: Mutex<Inner>,
    capacity: u64,
    refill_per_sec: u64,
}

struct Inner {
    tokens: u64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u64, refill_per_sec: u64) -> RateLimiter {
        RateLimiter {
            inner: Mutex::new(Inner {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec,
        }
    }

    /// An effectively unlimited bucket, used where no external rate limit
    /// is configured.
    pub fn unlimited() -> RateLimiter {
        RateLimiter::new(u64::MAX, 0)
    }

    fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        if self.refill_per_sec > 0 {
            let elapsed = inner.last_refill.elapsed();
            let refill = (elapsed.as_secs_f64() * self.refill_per_sec as f64) as u64;
            if refill > 0 {
                inner.tokens = (inner.tokens + refill).min(self.capacity);
                inner.last_refill = Instant::now();
            }
        }
        if inner.tokens > 0 {
            inner.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Blocks, sleeping in 100 ms increments, until a token is available.
    pub async fn acquire(&self) {
        while !self.try_acquire() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_never_blocks() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..1000 {
            limiter.acquire().await;
        }
    }

    #[tokio::test]
    async fn exhausting_capacity_forces_a_wait() {
        let limiter = RateLimiter::new(1, 0);
        limiter.acquire().await;
        assert!(!limiter.try_acquire());
    }
}
