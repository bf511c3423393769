/*!
 * Countdown Latch
 *
 * One-shot gate that opens when its count reaches zero, resettable once drained.
 *
 * The count is a CAS cell; the gate is a manual-reset [`Event`]. The transition to zero and
 * `reset` are serialized so a signal finishing concurrently with a reset can never reopen the new
 * cycle's gate. Waits spanning a `reset` are still a caller error.
 */

use super::event::{Event, ResetMode};
use crate::core::{SyncError, SyncResult};
use crate::sync::atomic::AtomicCell;
use crate::sync::config::SyncConfig;
use crate::sync::wait::{WaitOptions, WaitOutcome};
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

const PRIMITIVE: &str = "countdown latch";

/// Countdown latch
///
/// # Examples
///
/// ```
/// use sync_primitives::sync::CountdownLatch;
///
/// let latch = CountdownLatch::new(2);
/// assert!(!latch.signal().unwrap());
/// assert!(latch.signal().unwrap()); // this signal released the latch
/// latch.wait().unwrap();
/// ```
pub struct CountdownLatch {
    remaining: AtomicCell<usize>,
    initial: AtomicCell<usize>,
    gate: Event,
    transition: Mutex<()>,
    disposed: AtomicCell<bool>,
}

impl CountdownLatch {
    pub fn new(initial: usize) -> Self {
        Self::with_config(initial, SyncConfig::default())
    }

    pub fn with_config(initial: usize, config: SyncConfig) -> Self {
        Self {
            remaining: AtomicCell::new(initial),
            initial: AtomicCell::new(initial),
            gate: Event::with_config(ResetMode::Manual, initial == 0, config),
            transition: Mutex::new(()),
            disposed: AtomicCell::new(false),
        }
    }

    /// Record one completion; `true` if this call released the latch
    pub fn signal(&self) -> SyncResult<bool> {
        self.signal_n(1)
    }

    /// Record `n` completions
    ///
    /// Signaling past zero is a `CountUnderflow` and leaves the count unchanged.
    pub fn signal_n(&self, n: usize) -> SyncResult<bool> {
        self.check_disposed()?;
        if n == 0 {
            return Err(SyncError::InvalidArgument {
                primitive: PRIMITIVE,
                detail: "signal count must be positive",
            });
        }

        let _transition = self.transition.lock();
        let previous = self
            .remaining
            .update(|remaining| remaining.checked_sub(n))
            .map_err(|remaining| {
                warn!(primitive = PRIMITIVE, requested = n, remaining, "Signal past zero");
                SyncError::CountUnderflow {
                    primitive: PRIMITIVE,
                    requested: n,
                    remaining,
                }
            })?;

        if previous == n {
            self.gate.set()?;
            debug!(primitive = PRIMITIVE, "Released");
            return Ok(true);
        }
        Ok(false)
    }

    /// Raise the count by one while the latch is still closed
    pub fn add_count(&self) -> SyncResult<()> {
        self.add_count_n(1)
    }

    /// Raise the count by `n`; `InvalidState` once the latch has released
    pub fn add_count_n(&self, n: usize) -> SyncResult<()> {
        match self.try_add_count_n(n)? {
            true => Ok(()),
            false => Err(SyncError::InvalidState {
                primitive: PRIMITIVE,
                detail: "latch already released",
            }),
        }
    }

    /// `false` instead of an error if the latch already released
    pub fn try_add_count(&self) -> SyncResult<bool> {
        self.try_add_count_n(1)
    }

    pub fn try_add_count_n(&self, n: usize) -> SyncResult<bool> {
        self.check_disposed()?;
        if n == 0 {
            return Err(SyncError::InvalidArgument {
                primitive: PRIMITIVE,
                detail: "count increment must be positive",
            });
        }

        match self.remaining.update(|remaining| match remaining {
            0 => None,
            remaining => remaining.checked_add(n),
        }) {
            Ok(_) => Ok(true),
            Err(0) => Ok(false),
            Err(current) => Err(SyncError::CountOverflow {
                primitive: PRIMITIVE,
                requested: n,
                current,
                max: usize::MAX,
            }),
        }
    }

    /// Start a new cycle; only legal once the count has drained to zero
    pub fn reset(&self, count: usize) -> SyncResult<()> {
        self.check_disposed()?;
        let _transition = self.transition.lock();
        if !self.remaining.compare_and_set(0, count) {
            return Err(SyncError::InvalidState {
                primitive: PRIMITIVE,
                detail: "reset before the count reached zero",
            });
        }
        self.initial.store(count);
        if count > 0 {
            self.gate.reset()?;
        }
        debug!(primitive = PRIMITIVE, count, "Reset");
        Ok(())
    }

    /// Block until the count reaches zero
    pub fn wait(&self) -> SyncResult<()> {
        self.wait_with(&WaitOptions::new())?
            .into_result(PRIMITIVE)
    }

    /// `false` if the count did not reach zero within `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        Ok(self
            .wait_with(&WaitOptions::timeout(timeout))?
            .is_acquired())
    }

    pub fn wait_with(&self, options: &WaitOptions) -> SyncResult<WaitOutcome> {
        self.check_disposed()?;
        self.gate.wait_with(options)
    }

    pub async fn wait_async(&self, options: WaitOptions) -> SyncResult<WaitOutcome> {
        self.check_disposed()?;
        self.gate.wait_async(options).await
    }

    #[inline]
    pub fn current_count(&self) -> usize {
        self.remaining.load()
    }

    /// Count the current cycle started with
    #[inline]
    pub fn initial_count(&self) -> usize {
        self.initial.load()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.remaining.load() == 0
    }

    /// Tear down; refused while callers are waiting
    pub fn dispose(&self) -> SyncResult<()> {
        self.gate.dispose()?;
        self.disposed.store(true);
        Ok(())
    }

    fn check_disposed(&self) -> SyncResult<()> {
        if self.disposed.load() {
            return Err(SyncError::DisposedObjectUse {
                primitive: PRIMITIVE,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for CountdownLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountdownLatch")
            .field("remaining", &self.current_count())
            .field("initial", &self.initial_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_is_already_released() {
        let latch = CountdownLatch::new(0);
        assert!(latch.is_set());
        assert!(latch.wait_timeout(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_underflow_leaves_count() {
        let latch = CountdownLatch::new(2);
        assert!(matches!(
            latch.signal_n(3),
            Err(SyncError::CountUnderflow {
                requested: 3,
                remaining: 2,
                ..
            })
        ));
        assert_eq!(latch.current_count(), 2);
        assert!(latch.signal_n(2).unwrap());
        assert!(matches!(
            latch.signal(),
            Err(SyncError::CountUnderflow { .. })
        ));
    }

    #[test]
    fn test_add_count_after_release() {
        let latch = CountdownLatch::new(1);
        latch.add_count_n(2).unwrap();
        assert_eq!(latch.current_count(), 3);
        latch.signal_n(3).unwrap();

        assert!(!latch.try_add_count().unwrap());
        assert!(matches!(
            latch.add_count(),
            Err(SyncError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_reset_requires_drained() {
        let latch = CountdownLatch::new(1);
        assert!(matches!(
            latch.reset(4),
            Err(SyncError::InvalidState { .. })
        ));
        latch.signal().unwrap();
        latch.reset(4).unwrap();
        assert_eq!(latch.initial_count(), 4);
        assert!(!latch.wait_timeout(Duration::from_millis(5)).unwrap());
    }

    #[test]
    fn test_waiters_released_together() {
        let latch = Arc::new(CountdownLatch::new(3));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || latch.wait())
            })
            .collect();

        for _ in 0..3 {
            latch.signal().unwrap();
        }
        for waiter in waiters {
            waiter.join().unwrap().unwrap();
        }
    }

    #[test]
    fn test_dispose_refused_with_waiters() {
        let latch = Arc::new(CountdownLatch::new(1));
        let waiter = {
            let latch = latch.clone();
            thread::spawn(move || latch.wait())
        };
        while !latch.gate.has_waiters() {
            thread::yield_now();
        }
        assert!(latch.dispose().is_err());
        latch.signal().unwrap();
        waiter.join().unwrap().unwrap();
        latch.dispose().unwrap();
        assert!(latch.signal().is_err());
    }
}
