//! Retry policy for a single message.
//!
//! Holds the timing constants of the attempt loop so they can be configured
//! and tested apart from the dispatcher.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds and timing of the attempt loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts per message.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Deadline for the first attempt, which also pays for connection setup.
    ///
    /// Default: 90000 ms
    #[serde(default = "defaults::first_attempt_timeout_ms")]
    pub first_attempt_timeout_ms: u64,

    /// Deadline for every attempt after the first.
    ///
    /// Default: 60000 ms
    #[serde(default = "defaults::attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Backoff grows linearly: `attempt * backoff_step_ms`.
    ///
    /// Default: 2000 ms
    #[serde(default = "defaults::backoff_step_ms")]
    pub backoff_step_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            first_attempt_timeout_ms: defaults::first_attempt_timeout_ms(),
            attempt_timeout_ms: defaults::attempt_timeout_ms(),
            backoff_step_ms: defaults::backoff_step_ms(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this policy allowing `max_attempts` attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Deadline for the 1-based `attempt`.
    #[must_use]
    pub const fn attempt_deadline(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::from_millis(self.first_attempt_timeout_ms)
        } else {
            Duration::from_millis(self.attempt_timeout_ms)
        }
    }

    /// Pause after the 1-based `attempt` failed with a retryable error.
    #[must_use]
    pub const fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_step_ms.saturating_mul(attempt as u64))
    }

    /// Returns `true` if another attempt may follow the 1-based `attempt`.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Returns `true` if `attempt` is the last one allowed.
    #[must_use]
    pub const fn is_final_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn first_attempt_timeout_ms() -> u64 {
        90_000
    }

    pub const fn attempt_timeout_ms() -> u64 {
        60_000
    }

    pub const fn backoff_step_ms() -> u64 {
        2_000
    }
}
