//! # Exponential Backoff
//!
//! Provides a capped exponential backoff for list/watch retries.
//! Each delay doubles the previous one until it reaches the ceiling, then stays there.
//!
//! Default sequence for API retries: 1s, 2s, 4s, 8s, 16s, 32s, 60s (max).

use std::time::Duration;

/// Exponential backoff calculator
///
/// Generates retry delays that double on every call, capped at `max`.
/// Call `reset()` once the watched resource is flowing again.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay in the sequence (for reset)
    initial: Duration,
    /// Delay returned by the next call
    current: Duration,
    /// Ceiling for the sequence
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given first delay and ceiling
    ///
    /// # Arguments
    ///
    /// * `initial` - First delay returned (typically 1s)
    /// * `max` - Maximum delay (caps the sequence, typically 60s)
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            current: initial,
            max,
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}
