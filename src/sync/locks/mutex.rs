/*!
 * Reentrant Mutex
 *
 * Blocking exclusive lock keyed on [`CallerId`]. The holder may re-acquire; each acquire must be
 * matched by a release.
 *
 * # Design
 *
 * - Uncontended acquire is a single CAS on the owner word, no lock taken
 * - Contended callers queue FIFO; release hands ownership straight to the head of the queue, so a
 *   newcomer can never barge past a queued waiter
 * - Disposal swaps the owner word to a sentinel, which makes every later fast-path CAS fail
 */

use crate::core::{CallerId, SyncError, SyncResult};
use crate::sync::atomic::AtomicCell;
use crate::sync::config::SyncConfig;
use crate::sync::named::{NamedObjectHost, Opened, ProcessNamespace};
use crate::sync::wait::{block_on, Rendezvous, WaitOptions, WaitOutcome, WaitQueue, Waiter};
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const PRIMITIVE: &str = "mutex";
const NO_OWNER: u64 = 0;
const DISPOSED: u64 = u64::MAX;

struct MutexState {
    waiters: WaitQueue,
}

/// Reentrant, FIFO hand-off mutual exclusion lock
///
/// # Examples
///
/// ```
/// use sync_primitives::sync::ReentrantMutex;
///
/// let mutex = ReentrantMutex::new();
/// mutex.acquire().unwrap();
/// mutex.acquire().unwrap(); // same caller, depth 2
/// mutex.release().unwrap();
/// assert!(mutex.is_locked());
/// mutex.release().unwrap();
/// assert!(!mutex.is_locked());
/// ```
pub struct ReentrantMutex {
    owner: AtomicCell<u64>,
    depth: AtomicCell<usize>,
    state: Mutex<MutexState>,
    config: SyncConfig,
}

impl ReentrantMutex {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            owner: AtomicCell::new(NO_OWNER),
            depth: AtomicCell::new(0),
            state: Mutex::new(MutexState {
                waiters: WaitQueue::new(),
            }),
            config,
        }
    }

    /// Open or create a process-wide mutex registered under `name`
    pub fn open_named(name: &str) -> SyncResult<Opened<Self>> {
        ProcessNamespace::global().open_or_create(name, Self::new)
    }

    /// Block until the lock is held by the calling identity
    pub fn acquire(&self) -> SyncResult<()> {
        self.acquire_with(&WaitOptions::new())?
            .into_result(PRIMITIVE)
    }

    /// Acquire, giving up after `timeout`; a zero timeout never blocks
    pub fn try_acquire(&self, timeout: Duration) -> SyncResult<bool> {
        Ok(self
            .acquire_with(&WaitOptions::timeout(timeout))?
            .is_acquired())
    }

    /// Acquire with an optional deadline and cancellation token
    pub fn acquire_with(&self, options: &WaitOptions) -> SyncResult<WaitOutcome> {
        let me = CallerId::current();
        if self.try_fast(me)? {
            return Ok(WaitOutcome::Acquired);
        }
        if options.timeout.is_some_and(|t| t.is_zero()) {
            return Ok(WaitOutcome::TimedOut);
        }
        block_on(self, me, options, &self.config)
    }

    /// Drop one level of ownership; at depth zero the lock passes to the next queued waiter
    pub fn release(&self) -> SyncResult<()> {
        let me = CallerId::current();
        let owner = self.owner.load();
        if owner == DISPOSED {
            return Err(SyncError::DisposedObjectUse {
                primitive: PRIMITIVE,
            });
        }
        if owner != me.as_u64() {
            warn!(primitive = PRIMITIVE, caller = %me, "Release by non-owner");
            return Err(SyncError::OwnershipViolation {
                primitive: PRIMITIVE,
            });
        }

        let depth = self.depth.load();
        if depth > 1 {
            self.depth.store(depth - 1);
            return Ok(());
        }

        let next = {
            let mut state = self.state.lock();
            match state.waiters.claim_front() {
                Some(claimed) => {
                    self.owner.store(claimed.caller().as_u64());
                    self.depth.store(1);
                    Some(claimed)
                }
                None => {
                    self.depth.store(0);
                    self.owner.store(NO_OWNER);
                    None
                }
            }
        };
        // Wake outside the state lock
        drop(next);
        Ok(())
    }

    /// Acquire and return a guard that releases on drop
    pub fn lock(&self) -> SyncResult<MutexGuard<'_>> {
        self.acquire()?;
        Ok(MutexGuard::new(self))
    }

    pub fn try_lock(&self, timeout: Duration) -> SyncResult<Option<MutexGuard<'_>>> {
        Ok(self.try_acquire(timeout)?.then(|| MutexGuard::new(self)))
    }

    pub fn is_locked(&self) -> bool {
        !matches!(self.owner.load(), NO_OWNER | DISPOSED)
    }

    pub fn is_held_by_current(&self) -> bool {
        self.owner.load() == CallerId::current().as_u64()
    }

    /// Recursion depth of the calling identity (0 if it does not hold the lock)
    pub fn recursion_depth(&self) -> usize {
        if self.is_held_by_current() {
            self.depth.load()
        } else {
            0
        }
    }

    /// Tear down; refused while held or while callers are queued
    pub fn dispose(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.waiters.has_waiters() {
            return Err(SyncError::DisposeWhileInUse {
                primitive: PRIMITIVE,
                detail: "callers are waiting",
            });
        }
        match self.owner.compare_exchange(NO_OWNER, DISPOSED) {
            NO_OWNER | DISPOSED => {
                debug!(primitive = PRIMITIVE, "Disposed");
                Ok(())
            }
            _ => Err(SyncError::DisposeWhileInUse {
                primitive: PRIMITIVE,
                detail: "lock is held",
            }),
        }
    }

    fn try_fast(&self, me: CallerId) -> SyncResult<bool> {
        match self.owner.compare_exchange(NO_OWNER, me.as_u64()) {
            NO_OWNER => {
                self.depth.store(1);
                Ok(true)
            }
            DISPOSED => Err(SyncError::DisposedObjectUse {
                primitive: PRIMITIVE,
            }),
            owner if owner == me.as_u64() => {
                self.depth.increment();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Rendezvous for ReentrantMutex {
    fn primitive(&self) -> &'static str {
        PRIMITIVE
    }

    fn acquire_or_enqueue(&self, waiter: &Arc<Waiter>) -> SyncResult<bool> {
        let mut state = self.state.lock();
        if self.try_fast(waiter.caller())? {
            return Ok(true);
        }
        state.waiters.push(Arc::clone(waiter), ());
        Ok(false)
    }

    fn withdraw(&self, waiter: &Waiter) {
        self.state.lock().waiters.remove(waiter.id());
    }
}

impl Default for ReentrantMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReentrantMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantMutex")
            .field("locked", &self.is_locked())
            .field("owner", &CallerId::from_raw(self.owner.load()))
            .finish()
    }
}

/// Holds one level of a [`ReentrantMutex`]; bound to the acquiring thread
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard<'a> {
    mutex: &'a ReentrantMutex,
    _not_send: PhantomData<*const ()>,
}

impl<'a> MutexGuard<'a> {
    fn new(mutex: &'a ReentrantMutex) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.release() {
            warn!(error = %e, "Mutex guard dropped under a different caller identity");
        }
    }
}
