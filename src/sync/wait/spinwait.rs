/*!
 * Spin-Wait Backoff
 *
 * Bounded exponential backoff for busy-wait loops. Each step doubles the number of pause
 * instructions until the configured exponent cap, after which the thread yields to the scheduler.
 */

use std::hint;
use std::thread;
use std::time::{Duration, Instant};

/// Hard cap on the backoff exponent (65536 pauses per step)
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Bounded exponential backoff
///
/// # Performance
///
/// - Keeps contended cache lines quiet between CAS attempts
/// - Never sleeps; `snooze` degrades to `yield_now` once the cap is reached
#[derive(Debug)]
pub struct Backoff {
    step: u32,
    limit: u32,
}

impl Backoff {
    pub fn new(limit: u32) -> Self {
        Self {
            step: 0,
            limit: limit.min(MAX_BACKOFF_EXPONENT),
        }
    }

    /// Pause for 2^step iterations (capped); used between failed CAS attempts
    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..1u32 << self.step.min(self.limit) {
            hint::spin_loop();
        }
        if self.step <= self.limit {
            self.step += 1;
        }
    }

    /// Like `spin`, but yields the thread once the exponent cap is reached
    #[inline]
    pub fn snooze(&mut self) {
        if self.step <= self.limit {
            for _ in 0..1u32 << self.step {
                hint::spin_loop();
            }
            self.step += 1;
        } else {
            thread::yield_now();
        }
    }

    /// True once spinning no longer grows and the caller should consider parking
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.step > self.limit
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(6)
    }
}

/// Spin until `check` returns true, `max_spins` iterations pass, or `budget` elapses
///
/// Returns true if the condition was observed.
pub(crate) fn spin_until(max_spins: u32, budget: Duration, mut check: impl FnMut() -> bool) -> bool {
    if max_spins == 0 {
        return check();
    }

    let start = Instant::now();
    let mut backoff = Backoff::default();

    for spin_count in 0..max_spins {
        if check() {
            return true;
        }
        // Instant::now is comparatively expensive; sample it every few rounds
        if spin_count % 8 == 7 && start.elapsed() >= budget {
            break;
        }
        backoff.snooze();
    }

    check()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_backoff_completes_after_limit() {
        let mut backoff = Backoff::new(3);
        for _ in 0..4 {
            assert!(!backoff.is_completed());
            backoff.spin();
        }
        assert!(backoff.is_completed());

        backoff.reset();
        assert!(!backoff.is_completed());
    }

    #[test]
    fn test_spin_until_observes_condition() {
        let calls = Cell::new(0);
        let seen = spin_until(100, Duration::from_millis(10), || {
            calls.set(calls.get() + 1);
            calls.get() == 5
        });
        assert!(seen);
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn test_spin_until_gives_up() {
        assert!(!spin_until(20, Duration::from_millis(1), || false));
        assert!(!spin_until(0, Duration::ZERO, || false));
    }
}
