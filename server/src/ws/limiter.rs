//! Per-connection inbound rate limiting.
//!
//! A token bucket charged for every client frame (subscribe loops are the
//! abuse case). Owned by the connection's read pump, so a reconnect always
//! starts with a full bucket. Outbound server pushes are never limited.

use tokio::time::Instant;

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// `burst` is the bucket capacity, `refill_per_minute` the sustained
    /// rate. Zero values are clamped to 1 — the limiter is always on for
    /// WebSocket frames.
    pub fn new(burst: u32, refill_per_minute: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: f64::from(refill_per_minute.max(1)) / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Take one token if available. Refills lazily based on elapsed time.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
