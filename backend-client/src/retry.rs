use std::time::Duration;

/// Bounded retry schedule applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5_000),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `attempt`-th failure (1-based): `10 * 10^attempt` ms,
    /// clamped to `[min_delay, max_delay]`. `max_delay` wins when the
    /// bounds are inverted.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let raw_ms = 10u64.saturating_mul(10u64.saturating_pow(attempt));
        Duration::from_millis(raw_ms)
            .max(self.min_delay)
            .min(self.max_delay)
    }
}
