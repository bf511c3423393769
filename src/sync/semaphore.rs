/*!
 * Counting Semaphore
 *
 * Bounded permit counter with blocking and async acquisition.
 *
 * # Design
 *
 * - Fast path: a single CAS decrement on the [`BoundedCounter`], no lock taken
 * - Waiters queue FIFO; `release` hands permits straight to queued waiters before anything is added
 *   back to the counter, so the count is zero whenever someone is queued and nobody can barge
 * - A timed-out or cancelled waiter was never granted a permit (single CAS out of `WAITING`), and an
 *   async wait dropped after being granted gives its permit back
 */

use crate::core::{CallerId, SyncError, SyncResult};
use crate::sync::atomic::{AtomicCell, BoundedCounter};
use crate::sync::config::SyncConfig;
use crate::sync::named::{NamedObjectHost, Opened, ProcessNamespace};
use crate::sync::wait::{
    block_on, wait_async, Rendezvous, WaitOptions, WaitOutcome, WaitQueue, Waiter,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const PRIMITIVE: &str = "semaphore";

struct SemaphoreState {
    waiters: WaitQueue,
}

/// Counting semaphore with FIFO hand-off
///
/// # Examples
///
/// ```
/// use sync_primitives::sync::CountingSemaphore;
///
/// let semaphore = CountingSemaphore::new(1, 2).unwrap();
/// assert!(semaphore.try_acquire().unwrap());
/// assert!(!semaphore.try_acquire().unwrap());
/// assert_eq!(semaphore.release(2).unwrap(), 0);
/// assert!(semaphore.release(1).is_err()); // would exceed max
/// ```
pub struct CountingSemaphore {
    count: BoundedCounter,
    /// Written under `state`; read without it on the fast path
    disposed: AtomicCell<bool>,
    state: Mutex<SemaphoreState>,
    config: SyncConfig,
}

impl CountingSemaphore {
    pub fn new(initial: usize, max: usize) -> SyncResult<Self> {
        Self::with_config(initial, max, SyncConfig::default())
    }

    pub fn with_config(initial: usize, max: usize, config: SyncConfig) -> SyncResult<Self> {
        if max == 0 {
            return Err(SyncError::InvalidArgument {
                primitive: PRIMITIVE,
                detail: "max count must be positive",
            });
        }
        let count = BoundedCounter::new(initial, max).map_err(|_| SyncError::InvalidArgument {
            primitive: PRIMITIVE,
            detail: "initial count exceeds max count",
        })?;
        Ok(Self {
            count,
            disposed: AtomicCell::new(false),
            state: Mutex::new(SemaphoreState {
                waiters: WaitQueue::new(),
            }),
            config,
        })
    }

    /// Open or create a process-wide semaphore registered under `name`
    ///
    /// When the name already exists the existing semaphore is returned with its own counts.
    pub fn open_named(name: &str, initial: usize, max: usize) -> SyncResult<Opened<Self>> {
        let candidate = Self::new(initial, max)?;
        ProcessNamespace::global().open_or_create(name, move || candidate)
    }

    /// Block until a permit is taken
    pub fn acquire(&self) -> SyncResult<()> {
        self.acquire_with(&WaitOptions::new())?
            .into_result(PRIMITIVE)
    }

    /// Take a permit only if one is available right now
    pub fn try_acquire(&self) -> SyncResult<bool> {
        self.check_disposed()?;
        Ok(self.count.try_decrement())
    }

    /// `false` if no permit became available within `timeout`
    pub fn try_acquire_for(&self, timeout: Duration) -> SyncResult<bool> {
        Ok(self
            .acquire_with(&WaitOptions::timeout(timeout))?
            .is_acquired())
    }

    pub fn acquire_with(&self, options: &WaitOptions) -> SyncResult<WaitOutcome> {
        if self.try_acquire()? {
            return Ok(WaitOutcome::Acquired);
        }
        if options.timeout.is_some_and(|t| t.is_zero()) {
            return Ok(WaitOutcome::TimedOut);
        }
        block_on(self, CallerId::current(), options, &self.config)
    }

    /// Suspend until a permit is taken, the timeout elapses or the token is cancelled
    ///
    /// A timeout requires a tokio runtime with the time driver enabled.
    pub async fn acquire_async(&self, options: WaitOptions) -> SyncResult<WaitOutcome> {
        if self.try_acquire()? {
            return Ok(WaitOutcome::Acquired);
        }
        wait_async(self, options).await
    }

    /// Return `n` permits, handing them to queued waiters first
    ///
    /// Returns the count before the release. Fails with `CountOverflow`, leaving the state unchanged,
    /// if the count would exceed the maximum.
    pub fn release(&self, n: usize) -> SyncResult<usize> {
        if n == 0 {
            return Err(SyncError::InvalidArgument {
                primitive: PRIMITIVE,
                detail: "release count must be positive",
            });
        }

        let (previous, granted) = {
            let mut state = self.state.lock();
            if self.disposed.load() {
                return Err(SyncError::DisposedObjectUse {
                    primitive: PRIMITIVE,
                });
            }

            let previous = self.count.value();
            if previous.checked_add(n).map_or(true, |next| next > self.count.max()) {
                warn!(
                    primitive = PRIMITIVE,
                    previous,
                    requested = n,
                    max = self.count.max(),
                    "Release would exceed max count"
                );
                return Err(SyncError::CountOverflow {
                    primitive: PRIMITIVE,
                    requested: n,
                    current: previous,
                    max: self.count.max(),
                });
            }

            let mut granted = Vec::new();
            while granted.len() < n {
                match state.waiters.claim_front() {
                    Some(claimed) => granted.push(claimed),
                    None => break,
                }
            }

            let remainder = n - granted.len();
            if remainder > 0 && self.count.try_add(remainder).is_err() {
                // Only the fast path runs concurrently and it only decrements
                return Err(SyncError::CountOverflow {
                    primitive: PRIMITIVE,
                    requested: n,
                    current: self.count.value(),
                    max: self.count.max(),
                });
            }
            (previous, granted)
        };

        // Wake outside the state lock
        drop(granted);
        Ok(previous)
    }

    /// Acquire and return a permit that is released on drop
    pub fn permit(&self) -> SyncResult<SemaphorePermit<'_>> {
        self.acquire()?;
        Ok(SemaphorePermit { semaphore: self })
    }

    pub fn try_permit(&self) -> SyncResult<Option<SemaphorePermit<'_>>> {
        Ok(self
            .try_acquire()?
            .then_some(SemaphorePermit { semaphore: self }))
    }

    #[inline]
    pub fn current_count(&self) -> usize {
        self.count.value()
    }

    #[inline]
    pub fn max_count(&self) -> usize {
        self.count.max()
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.count_where(|_| true)
    }

    /// Tear down; refused while callers are queued
    pub fn dispose(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.waiters.has_waiters() {
            return Err(SyncError::DisposeWhileInUse {
                primitive: PRIMITIVE,
                detail: "callers are waiting",
            });
        }
        self.disposed.store(true);
        debug!(primitive = PRIMITIVE, "Disposed");
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

impl Rendezvous for CountingSemaphore {
    fn primitive(&self) -> &'static str {
        PRIMITIVE
    }

    fn acquire_or_enqueue(&self, waiter: &Arc<Waiter>) -> SyncResult<bool> {
        let mut state = self.state.lock();
        if self.disposed.load() {
            return Err(SyncError::DisposedObjectUse {
                primitive: PRIMITIVE,
            });
        }
        if self.count.try_decrement() {
            return Ok(true);
        }
        state.waiters.push(Arc::clone(waiter), ());
        Ok(false)
    }

    fn withdraw(&self, waiter: &Waiter) {
        self.state.lock().waiters.remove(waiter.id());
    }

    fn restore(&self) {
        if let Err(e) = self.release(1) {
            warn!(error = %e, "Could not return permit of a dropped wait");
        }
    }
}

impl fmt::Debug for CountingSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingSemaphore")
            .field("count", &self.current_count())
            .field("max", &self.max_count())
            .finish()
    }
}

/// One permit, released on drop
#[must_use = "the permit is released as soon as it is dropped"]
pub struct SemaphorePermit<'a> {
    semaphore: &'a CountingSemaphore,
}

impl SemaphorePermit<'_> {
    /// Keep the permit acquired past the guard's lifetime
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.semaphore.release(1) {
            warn!(error = %e, "Semaphore permit could not be returned");
        }
    }
}
