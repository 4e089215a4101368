//! Reconnect Backoff
//!
//! Linear, capped backoff for login/socket attempts. Failure `n` of an
//! unbroken streak waits `min(n * step, cap)` before the next attempt; the
//! streak ends in a give-up once `max_attempts` failures have accumulated.

use std::time::Duration;

/// Delay added per failed attempt
pub const BACKOFF_STEP: Duration = Duration::from_secs(10);

/// Longest delay between two attempts
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(1200);

/// Number of failed attempts after which reconnecting stops
pub const MAX_RECONNECT_ATTEMPTS: u32 = 120;

/// Failure count at which the retry status is flagged as important
pub const IMPORTANT_ATTEMPT: u32 = 10;

/// Outcome of recording one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Try again after the given delay
    Retry { attempt: u32, delay: Duration },
    /// Attempt budget used up
    Exhausted { attempts: u32 },
}

/// Reconnection policy with a linear, capped backoff
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Failures in the current streak
    attempt: u32,
    /// Maximum number of failures before giving up
    max_attempts: u32,
    /// Delay added per failure
    step: Duration,
    /// Maximum delay between attempts
    max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempt: 0,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            step: BACKOFF_STEP,
            max_delay: MAX_BACKOFF_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy with custom limits
    pub fn new(step: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            step,
            max_delay,
        }
    }

    /// Reset the failure streak
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failures recorded in the current streak
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Maximum failures before giving up
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following failure number `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        std::cmp::min(self.step.saturating_mul(attempt), self.max_delay)
    }

    /// Record a failed attempt and decide what happens next
    pub fn record_failure(&mut self) -> Backoff {
        self.attempt = self.attempt.saturating_add(1);

        if self.attempt >= self.max_attempts {
            return Backoff::Exhausted {
                attempts: self.attempt,
            };
        }

        Backoff::Retry {
            attempt: self.attempt,
            delay: self.delay_for(self.attempt),
        }
    }

    /// Get human-readable status
    pub fn status(&self) -> String {
        format!(
            "Attempt {}/{}, next delay: {:?}",
            self.attempt,
            self.max_attempts,
            self.delay_for(self.attempt.saturating_add(1))
        )
    }
}
