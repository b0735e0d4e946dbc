use std::time::Duration;

use rand::Rng;

use crate::config::VerificationOptions;

/// Poll interval schedule: a fixed interval for the first polls, then
/// doubling up to a cap, with half of each doubled interval jittered.
#[derive(Debug, Clone)]
pub struct PollingBackoff {
    initial: Duration,
    max: Duration,
    num_at_initial: u32,
    attempt: u32,
}

impl PollingBackoff {
    pub fn new(options: &VerificationOptions) -> Self {
        Self {
            initial: options.polling_interval,
            max: options.max_polling_interval,
            num_at_initial: options.num_at_initial_polling_interval,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before poll `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt <= self.num_at_initial {
            return self.initial.min(self.max);
        }
        let exponent = (attempt - self.num_at_initial).min(31);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let base = self.base_delay(self.attempt);
        if self.attempt <= self.num_at_initial {
            base
        } else {
            jitter(base)
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Half of `base` plus a uniform share of the other half.
fn jitter(base: Duration) -> Duration {
    let half = base / 2;
    let spread_ms = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
    half + Duration::from_millis(rand::rng().random_range(0..=spread_ms))
}
