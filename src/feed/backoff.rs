// =============================================================================
// Reconnect backoff: capped exponential delay, reset on a healthy connection
// =============================================================================

use std::time::Duration;

/// Delay schedule between reconnect attempts.
///
/// Each call to [`next_delay`](Self::next_delay) returns the current delay and
/// doubles it for the following failure, saturating at `max`. The schedule is
/// restarted with [`reset`](Self::reset) once a connection reaches CONNECTED.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}
