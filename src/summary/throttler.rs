//! Sliding-Window Retry Throttle
//!
//! Pure backoff arithmetic used to pace expensive retried operations (spawning a
//! summarizer instance) without a hard retry-count ceiling. Attempts accumulate
//! inside a time window and map to a non-decreasing delay, clamped to a maximum;
//! once the window elapses the count resets and the delay drops back to base.

use std::time::{Duration, Instant};

/// Maps the attempt index within the current window to a delay. Must be
/// non-decreasing in the attempt index.
pub type DelayFn = Box<dyn Fn(u32) -> Duration + Send + Sync>;

pub struct Throttler {
    window: Duration,
    max_delay: Duration,
    delay_fn: DelayFn,
    window_start: Instant,
    attempts: u32,
}

impl Throttler {
    pub fn new(window: Duration, max_delay: Duration, delay_fn: DelayFn) -> Self {
        Self {
            window,
            max_delay,
            delay_fn,
            window_start: Instant::now(),
            attempts: 0,
        }
    }

    /// Convenience constructor: delay doubles per attempt from `base`.
    pub fn exponential(window: Duration, max_delay: Duration, base: Duration) -> Self {
        Self::new(
            window,
            max_delay,
            Box::new(move |attempts| base * 2u32.saturating_pow(attempts)),
        )
    }

    /// Computes the delay for the next attempt.
    ///
    /// If the window has elapsed since it started, the attempt count resets to
    /// zero and a new window begins; otherwise the count increments. The returned
    /// delay is `min(delay_fn(attempts), max_delay)`.
    pub fn get_delay(&mut self) -> Duration {
        self.get_delay_at(Instant::now())
    }

    /// Time-injected variant of `get_delay` for deterministic callers.
    pub fn get_delay_at(&mut self, now: Instant) -> Duration {
        if now.duration_since(self.window_start) > self.window {
            self.attempts = 0;
            self.window_start = now;
        } else {
            self.attempts += 1;
        }

        let delay = (self.delay_fn)(self.attempts).min(self.max_delay);

        tracing::trace!(
            "Throttle attempt {} in window -> delay {:?}",
            self.attempts,
            delay
        );

        delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether the given delay sits at the clamp ceiling.
    pub fn at_ceiling(&self, delay: Duration) -> bool {
        delay >= self.max_delay
    }
}
