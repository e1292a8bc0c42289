//! Exponential backoff with a cap and an attempt ceiling. Used in exactly
//! one place: the Supervisor's restart loop.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// `{ base, cap, maxAttempts, attempt }` from spec.md §3.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            base: config.base,
            cap: config.cap,
            max_attempts: config.max_attempts,
            attempt: 0,
        }
    }

    /// `min(base · 2^attempt, cap)`, then post-increments `attempt`.
    ///
    /// Clamps to `cap` before doubling so large attempt counts never
    /// overflow the underlying integer multiplication.
    pub fn next(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.base;
        for _ in 0..attempt {
            if delay >= self.cap {
                return self.cap;
            }
            delay = delay.saturating_mul(2);
        }
        delay.min(self.cap)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
