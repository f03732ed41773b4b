//! Reopen pacing for sources that can fail open.

use std::time::{Duration, Instant};

/// Exponential backoff between reopen attempts.
///
/// The delay starts at `base`, doubles after every attempt that did not bring the
/// device back and never exceeds `cap`. `reset` is called once the device produces
/// frames again. Callers poll `ready` instead of sleeping so that no lock is held
/// while waiting.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
    next_attempt: Option<Instant>,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        let cap = cap.max(base);
        Self {
            base,
            cap,
            current: base,
            next_attempt: None,
            attempts: 0,
        }
    }

    /// True when an attempt is allowed at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.next_attempt.map_or(true, |at| now >= at)
    }

    /// Record an attempt made at `now` and return the delay before the next one.
    pub fn schedule_next(&mut self, now: Instant) -> Duration {
        let delay = self.current;
        self.next_attempt = Some(now + delay);
        self.current = self.current.saturating_mul(2).min(self.cap);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.next_attempt = None;
        self.attempts = 0;
    }

    /// Delay that the next attempt would impose.
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
