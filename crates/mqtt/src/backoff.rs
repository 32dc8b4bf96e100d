//! Exponential backoff for reconnection attempts.
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max_delay)
//! ```
//!
//! With the defaults (1s, x2, capped at 60s) the kernel waits 1s, 2s, 4s, ...
//! 32s, 60s, 60s, ... between attempts. The attempt counter resets as soon as
//! the broker accepts a connection.
//!
//! Unlike a retry policy that gives up, the default schedule is unlimited: a
//! sensor has nothing better to do than keep trying. A hard limit can still be
//! set for tests or supervised deployments.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    #[error("Maximum number of attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
    /// `None` retries forever.
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Creates an unlimited backoff schedule.
    ///
    /// A multiplier below 1.0 is clamped to 1.0 (constant delay), and an
    /// initial delay above `max` is clamped to `max`.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let initial = initial.min(max);
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier: multiplier.max(1.0),
            attempt: 0,
            max_attempts: None,
        }
    }

    /// Limits the number of attempts. `0` means unlimited.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = (max > 0).then_some(max);
        self
    }

    /// Call after a successful connection so the next failure starts over.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the delay before the next attempt and advances the schedule.
    ///
    /// # Errors
    ///
    /// `BackoffError::MaxAttemptLimitError` once a configured limit is exceeded.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt = self.attempt.saturating_add(1);

        if let Some(max) = self.max_attempts {
            if self.attempt > max {
                return Err(BackoffError::MaxAttemptLimitError(max));
            }
        }

        let sleep = self.current_delay;
        let next = Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.multiplier);
        self.current_delay = next.min(self.max_delay);

        Ok(sleep)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

impl Default for Backoff {
    /// 1 second initial delay, doubling, capped at 60 seconds, unlimited.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}
