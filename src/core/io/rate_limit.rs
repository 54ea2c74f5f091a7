// src/core/io/rate_limit.rs

//! A token bucket used to hold socket reads to a steady byte rate.

use std::time::Duration;
use tokio::time::Instant;

/// Refills at `rate` tokens (bytes) per second, with a burst capacity of one
/// second's worth of tokens.
pub struct TokenBucket {
    rate: u64,
    tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: u64) -> Self {
        assert!(rate > 0, "rate limit must be positive");
        Self {
            rate,
            tokens: rate,
            last_refill: Instant::now(),
        }
    }

    /// Takes `amount` tokens, sleeping until the bucket has refilled enough.
    pub async fn acquire(&mut self, mut amount: u64) {
        while amount > 0 {
            self.refill();
            if self.tokens > 0 {
                let taken = self.tokens.min(amount);
                self.tokens -= taken;
                amount -= taken;
                continue;
            }
            // Sleep for however long one outstanding token takes to appear,
            // capped so a tiny rate still wakes up periodically.
            let wait_ms = (1000 / self.rate.max(1)).clamp(1, 100);
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed();
        let add = (elapsed.as_secs_f64() * self.rate as f64) as u64;
        if add > 0 {
            self.tokens = (self.tokens + add).min(self.rate);
            self.last_refill = Instant::now();
        }
    }
}
