/*!
 * Spin Lock
 *
 * Busy-wait mutual exclusion on a CAS'd flag with bounded exponential backoff.
 *
 * # Contract
 *
 * Critical sections must be short and must not block (no I/O, no other blocking lock, no
 * suspension). The lock cannot detect misuse; callers are warned, not prevented.
 *
 * With owner tracking enabled the holder's [`CallerId`] is recorded, re-entry fails fast with
 * `ReentrancyViolation` and `exit` by another caller fails with `OwnershipViolation`.
 */

use crate::core::{CallerId, SyncError, SyncResult};
use crate::sync::atomic::AtomicCell;
use crate::sync::config::SyncConfig;
use crate::sync::wait::Backoff;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::warn;

const PRIMITIVE: &str = "spin lock";
const NO_OWNER: u64 = 0;

/// Non-reentrant busy-wait lock
pub struct SpinLock {
    locked: AtomicCell<bool>,
    owner: AtomicCell<u64>,
    track_owner: bool,
    backoff_limit: u32,
    disposed: AtomicCell<bool>,
}

impl SpinLock {
    pub fn new() -> Self {
        Self::with_owner_tracking(false)
    }

    pub fn with_owner_tracking(track_owner: bool) -> Self {
        Self {
            locked: AtomicCell::new(false),
            owner: AtomicCell::new(NO_OWNER),
            track_owner,
            backoff_limit: SyncConfig::default().backoff_limit,
            disposed: AtomicCell::new(false),
        }
    }

    /// Take the backoff exponent cap from `config`
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.backoff_limit = config.backoff_limit;
        self
    }

    #[inline]
    pub fn is_owner_tracking(&self) -> bool {
        self.track_owner
    }

    /// Spin until the lock is taken
    pub fn enter(&self) -> SyncResult<()> {
        let me = self.check_entry()?;
        let mut backoff = Backoff::new(self.backoff_limit);
        while !self.try_take(me) {
            backoff.snooze();
        }
        Ok(())
    }

    /// Spin until the lock is taken or `timeout` elapses; a zero timeout is a single attempt
    pub fn try_enter(&self, timeout: Duration) -> SyncResult<bool> {
        let me = self.check_entry()?;
        let deadline = Instant::now().checked_add(timeout);
        let mut backoff = Backoff::new(self.backoff_limit);
        loop {
            if self.try_take(me) {
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            backoff.snooze();
        }
    }

    pub fn exit(&self) -> SyncResult<()> {
        if !self.locked.load() {
            warn!(primitive = PRIMITIVE, "Exit without a matching enter");
            return Err(SyncError::OwnershipViolation {
                primitive: PRIMITIVE,
            });
        }
        if self.track_owner && self.owner.load() != CallerId::current().as_u64() {
            warn!(primitive = PRIMITIVE, caller = %CallerId::current(), "Exit by non-owner");
            return Err(SyncError::OwnershipViolation {
                primitive: PRIMITIVE,
            });
        }
        self.owner.store(NO_OWNER);
        self.locked.store(false);
        Ok(())
    }

    /// Enter and return a guard that exits on drop
    pub fn lock(&self) -> SyncResult<SpinGuard<'_>> {
        self.enter()?;
        Ok(SpinGuard { lock: self })
    }

    /// Single attempt without spinning
    pub fn try_lock(&self) -> SyncResult<Option<SpinGuard<'_>>> {
        Ok(self
            .try_enter(Duration::ZERO)?
            .then_some(SpinGuard { lock: self }))
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.locked.load()
    }

    /// Only meaningful with owner tracking enabled
    pub fn is_held_by_current(&self) -> bool {
        self.track_owner && self.is_held() && self.owner.load() == CallerId::current().as_u64()
    }

    /// Tear down; refused while held
    pub fn dispose(&self) -> SyncResult<()> {
        if self.is_held() {
            return Err(SyncError::DisposeWhileInUse {
                primitive: PRIMITIVE,
                detail: "lock is held",
            });
        }
        self.disposed.store(true);
        Ok(())
    }

    fn check_entry(&self) -> SyncResult<u64> {
        if self.disposed.load() {
            return Err(SyncError::DisposedObjectUse {
                primitive: PRIMITIVE,
            });
        }
        let me = CallerId::current().as_u64();
        if self.track_owner && self.is_held() && self.owner.load() == me {
            warn!(primitive = PRIMITIVE, caller = me, "Recursive enter on non-reentrant lock");
            return Err(SyncError::ReentrancyViolation {
                primitive: PRIMITIVE,
                detail: "spin lock is not reentrant",
            });
        }
        Ok(me)
    }

    // Test-and-test-and-set: read first so contended spinning stays in the local cache
    #[inline]
    fn try_take(&self, me: u64) -> bool {
        if self.locked.load() || !self.locked.compare_and_set(false, true) {
            return false;
        }
        if self.track_owner {
            self.owner.store(me);
        }
        true
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_held())
            .field("track_owner", &self.track_owner)
            .finish()
    }
}

/// Holds a [`SpinLock`] until dropped
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        // The guard was created by the holder; exit can only fail if the caller identity changed
        if let Err(e) = self.lock.exit() {
            warn!(error = %e, "Spin guard released by a different caller identity");
            self.lock.owner.store(NO_OWNER);
            self.lock.locked.store(false);
        }
    }
}
