//! Capped exponential backoff shared by stream reconnection and polling.

use std::time::Duration;

/// Doubling delay: the first failure waits `seed`, each further failure
/// doubles it, never beyond `max`. A success resets it to nothing.
#[derive(Clone, Debug)]
pub struct Backoff {
    seed: Duration,
    max: Duration,
    current: Option<Duration>,
    failures: u32,
}

impl Backoff {
    pub fn new(seed: Duration, max: Duration) -> Self {
        Self {
            seed,
            max: max.max(seed),
            current: None,
            failures: 0,
        }
    }

    /// Record a failure and return the delay to wait before the next try.
    pub fn fail(&mut self) -> Duration {
        let next = match self.current {
            None => self.seed,
            Some(d) => d.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        self.failures = self.failures.saturating_add(1);
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
