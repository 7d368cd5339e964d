//! Token bucket implementation.

use std::time::Duration;
use tokio::time::Instant;

/// A token bucket that refills continuously at a fixed rate.
///
/// The bucket does not store a running timer. Instead it remembers the token
/// count at the moment of its last update and derives the current count from
/// the elapsed time, so it is only ever touched while the caller holds the
/// registry lock.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Tokens added per second
    rate: f64,
    /// Maximum number of tokens the bucket can hold
    burst: u32,
    /// Token count as of `last`
    tokens: f64,
    /// When `tokens` was last brought up to date
    last: Instant,
}

impl TokenBucket {
    /// Create a new bucket that starts full.
    pub fn new(rate: f64, burst: u32, now: Instant) -> Self {
        Self {
            rate,
            burst,
            tokens: f64::from(burst),
            last: now,
        }
    }

    /// Get the refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Get the burst capacity.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Try to take one token.
    ///
    /// Returns `true` if a token was available. A failed attempt leaves the
    /// token count untouched.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.advance(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens available at `now`.
    pub fn remaining(&self, now: Instant) -> u32 {
        self.tokens_at(now).floor() as u32
    }

    /// How long until at least one token is available.
    pub fn delay_until_available(&self, now: Instant) -> Duration {
        let tokens = self.tokens_at(now);
        if tokens >= 1.0 {
            return Duration::ZERO;
        }
        duration_from_secs((1.0 - tokens) / self.rate)
    }

    /// How long until the bucket is back at full burst.
    pub fn duration_until_full(&self, now: Instant) -> Duration {
        let missing = f64::from(self.burst) - self.tokens_at(now);
        if missing <= 0.0 {
            return Duration::ZERO;
        }
        duration_from_secs(missing / self.rate)
    }

    fn tokens_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        (self.tokens + elapsed * self.rate).min(f64::from(self.burst))
    }

    fn advance(&mut self, now: Instant) {
        // Callers racing for the lock may arrive with a slightly older `now`
        if now > self.last {
            self.tokens = self.tokens_at(now);
            self.last = now;
        }
    }
}

fn duration_from_secs(secs: f64) -> Duration {
    if !secs.is_finite() || secs >= u64::MAX as f64 {
        Duration::MAX
    } else {
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Round a duration up to whole seconds.
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    if duration.subsec_nanos() > 0 {
        duration.as_secs().saturating_add(1)
    } else {
        duration.as_secs()
    }
}
