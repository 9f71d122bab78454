//! Token-bucket admission control
//!
//! Capacity equals the configured requests-per-minute; the bucket refills
//! continuously at `capacity / 60` tokens per second. Refill is computed from
//! elapsed time on each access, so there is no background timer. The
//! read-refill-debit sequence runs under one lock.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    updated_at: Instant,
}

/// Shared token bucket; `None` capacity admits everything
#[derive(Debug)]
pub struct TokenBucket {
    capacity: Option<f64>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket. A limit of 0 or less disables limiting.
    pub fn new(requests_per_minute: i64) -> Self {
        let capacity = (requests_per_minute > 0).then(|| requests_per_minute as f64);
        Self {
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity.unwrap_or(0.0),
                updated_at: Instant::now(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity.is_some()
    }

    /// Try to take `amount` tokens; returns whether the request is admitted
    pub fn consume(&self, amount: u32) -> bool {
        self.consume_at(amount, Instant::now())
    }

    /// Restore full capacity
    pub fn reset(&self) {
        let mut state = self.lock();
        state.tokens = self.capacity.unwrap_or(0.0);
        state.updated_at = Instant::now();
    }

    /// Tokens currently available (after refill)
    pub fn available(&self) -> f64 {
        let Some(capacity) = self.capacity else {
            return f64::INFINITY;
        };
        let mut state = self.lock();
        Self::refill(&mut state, capacity, Instant::now());
        state.tokens
    }

    fn consume_at(&self, amount: u32, now: Instant) -> bool {
        let Some(capacity) = self.capacity else {
            return true;
        };
        if amount == 0 {
            return true;
        }

        let mut state = self.lock();
        Self::refill(&mut state, capacity, now);

        let amount = f64::from(amount);
        if state.tokens >= amount {
            state.tokens -= amount;
            true
        } else {
            tracing::debug!(
                available = state.tokens,
                requested = amount,
                "Rate limit: request rejected"
            );
            false
        }
    }

    fn refill(state: &mut BucketState, capacity: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(state.updated_at).as_secs_f64();
        if elapsed > 0.0 {
            let rate_per_second = capacity / 60.0;
            state.tokens = (state.tokens + elapsed * rate_per_second).min(capacity);
            state.updated_at = now;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // A panic while holding the lock cannot leave the counters torn
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
