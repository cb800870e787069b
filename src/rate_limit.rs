//! Token-bucket rate limiter shared by all concurrent RPC workers.
//!
//! Capacity is `max(1, requests_per_minute / 60)` and the bucket refills at
//! that same rate per second, giving one second of headroom. Refill is lazy:
//! every operation first credits the tokens earned since the last refill.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const ACQUIRE_BACKOFF: Duration = Duration::from_millis(100);

pub struct RateLimiter {
    tokens: AtomicU64,
    last_refill_secs: AtomicU64,
    capacity: AtomicU64,
    refill_rate: AtomicU64,
    started: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u64) -> Self {
        let capacity = (requests_per_minute / 60).max(1);
        info!(
            "Rate limiter initialized: {} requests per minute ({} per second)",
            requests_per_minute, capacity
        );
        Self {
            tokens: AtomicU64::new(capacity),
            last_refill_secs: AtomicU64::new(0),
            capacity: AtomicU64::new(capacity),
            refill_rate: AtomicU64::new(capacity),
            started: Instant::now(),
        }
    }

    /// Consumes one token if available. Never blocks.
    pub fn try_acquire(&self) -> bool {
        self.refill();

        loop {
            let current = self.tokens.load(Ordering::Acquire);
            if current == 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                debug!("Token acquired, remaining: {}", current - 1);
                return true;
            }
        }
    }

    /// Waits until a token is consumed. Callers cancel by dropping the
    /// future (e.g. inside `select!`); no token is consumed in that case.
    pub async fn acquire(&self) {
        while !self.try_acquire() {
            tokio::time::sleep(ACQUIRE_BACKOFF).await;
        }
    }

    /// Current token count after a lazy refill.
    pub fn available(&self) -> u64 {
        self.refill();
        self.tokens.load(Ordering::Acquire)
    }

    /// Replaces the bucket capacity at runtime and refills it.
    pub fn reconfigure(&self, requests_per_minute: u64) {
        let capacity = (requests_per_minute / 60).max(1);
        info!(
            "Reconfiguring rate limiter: {} requests per minute ({} per second)",
            requests_per_minute, capacity
        );
        self.capacity.store(capacity, Ordering::Release);
        self.refill_rate.store(capacity, Ordering::Release);
        self.tokens.store(capacity, Ordering::Release);
        self.last_refill_secs
            .store(self.now_secs(), Ordering::Release);
    }

    fn now_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    fn refill(&self) {
        let now = self.now_secs();
        let last = self.last_refill_secs.load(Ordering::Acquire);
        if now <= last {
            return;
        }

        let rate = self.refill_rate.load(Ordering::Acquire);
        let to_add = (now - last).saturating_mul(rate);
        if to_add == 0 {
            return;
        }

        let capacity = self.capacity.load(Ordering::Acquire);
        let current = self.tokens.load(Ordering::Acquire);
        let refilled = current.saturating_add(to_add).min(capacity);
        if self
            .tokens
            .compare_exchange(current, refilled, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.last_refill_secs.store(now, Ordering::Release);
            debug!("Refilled to {} tokens", refilled);
        }
        // A lost race simply defers the refill to the next caller.
    }
}
