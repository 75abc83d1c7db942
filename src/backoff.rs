//! Linear reconnection backoff.
//!
//! The backoff only computes delays; the caller decides when to sleep.
//! Keeping the arithmetic separate from the clock lets tests assert the
//! whole delay schedule without waiting on timers.

use std::time::Duration;

/// Tracks consecutive connection attempts and derives the delay before
/// each one.
///
/// The delay grows linearly: attempt `n` waits `initial * n`, so the
/// very first attempt (attempt 0) connects immediately.
#[derive(Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration) -> Self {
        Self {
            initial,
            attempt: 0,
        }
    }

    /// Current attempt count (number of consecutive failures so far).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next attempt, then bump the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.initial * self.attempt;
        self.attempt += 1;
        delay
    }

    /// Forget accumulated failures after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_has_no_delay() {
        let mut backoff = Backoff::new(Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_delay_grows_linearly() {
        let mut backoff = Backoff::new(Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(16));
        assert_eq!(backoff.next_delay(), Duration::from_secs(24));
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = Backoff::new(Duration::from_secs(8));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_zero_initial_stays_zero() {
        let mut backoff = Backoff::new(Duration::ZERO);
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Duration::ZERO);
        }
    }
}
