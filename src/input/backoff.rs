//! Bounded exponential backoff for stream reconnects.

use std::time::Duration;

use crate::config::ReconnectConfig;

#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    failures: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            max_attempts: config.max_attempts,
            failures: 0,
        }
    }

    /// Record a failed attempt. Returns how long to wait before the next one,
    /// or `None` once `max_attempts` consecutive attempts have failed.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }
        let shift = (self.failures - 1).min(16);
        Some(self.initial.saturating_mul(1 << shift).min(self.max))
    }

    /// A session delivered frames; start counting from scratch.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
