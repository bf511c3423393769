/*!
 * Monitor
 *
 * Explicit lock handle that owns the data it protects, with condition wait/pulse on the same lock.
 * Entering yields a guard that dereferences to the data; waiting atomically releases the lock,
 * sleeps until pulsed and re-acquires before returning.
 */

use super::mutex::ReentrantMutex;
use crate::core::{CallerId, SyncError, SyncResult};
use crate::monitoring::WaitSpan;
use crate::sync::config::SyncConfig;
use crate::sync::wait::{attach, WaitOptions, WaitOutcome, WaitQueue, Waiter, WaiterState};
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tracing::{trace, warn};

const PRIMITIVE: &str = "monitor";

/// Data plus the lock and condition queue guarding it
///
/// # Examples
///
/// ```
/// use sync_primitives::sync::Monitor;
///
/// let monitor = Monitor::new(Vec::new());
/// monitor.enter().unwrap().push(1);
/// assert_eq!(monitor.enter().unwrap().len(), 1);
/// ```
pub struct Monitor<T> {
    lock: ReentrantMutex,
    condition: Mutex<WaitQueue>,
    config: SyncConfig,
    data: UnsafeCell<T>,
}

// SAFETY: the data is only reachable through a guard, and at most one guard exists at a time
unsafe impl<T: Send> Send for Monitor<T> {}
unsafe impl<T: Send> Sync for Monitor<T> {}

impl<T> Monitor<T> {
    pub fn new(data: T) -> Self {
        Self::with_config(data, SyncConfig::default())
    }

    pub fn with_config(data: T, config: SyncConfig) -> Self {
        Self {
            lock: ReentrantMutex::with_config(config.clone()),
            condition: Mutex::new(WaitQueue::new()),
            config,
            data: UnsafeCell::new(data),
        }
    }

    /// Block until the monitor is entered
    pub fn enter(&self) -> SyncResult<MonitorGuard<'_, T>> {
        self.check_not_held()?;
        self.lock.acquire()?;
        Ok(MonitorGuard::new(self))
    }

    /// `None` if the monitor could not be entered within `timeout`
    pub fn try_enter(&self, timeout: Duration) -> SyncResult<Option<MonitorGuard<'_, T>>> {
        self.check_not_held()?;
        Ok(self
            .lock
            .try_acquire(timeout)?
            .then_some(MonitorGuard::new(self)))
    }

    pub fn is_entered(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    // Two guards for the same data would alias `&mut T`
    fn check_not_held(&self) -> SyncResult<()> {
        if self.lock.is_held_by_current() {
            return Err(SyncError::ReentrancyViolation {
                primitive: PRIMITIVE,
                detail: "monitor already entered by this caller",
            });
        }
        Ok(())
    }
}

impl<T: Default> Default for Monitor<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Monitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("entered", &self.is_entered())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a [`Monitor`]'s data
///
/// The guard stays on the thread that entered the monitor, since releasing is checked against the
/// caller identity. It can only be shared across threads when the data itself is `Sync`:
///
/// ```compile_fail
/// use sync_primitives::sync::{Monitor, MonitorGuard};
/// use std::cell::Cell;
///
/// fn assert_sync<T: Sync>() {}
/// assert_sync::<MonitorGuard<'static, Cell<i32>>>();
/// ```
///
/// ```compile_fail
/// use sync_primitives::sync::{Monitor, MonitorGuard};
///
/// fn assert_send<T: Send>() {}
/// assert_send::<MonitorGuard<'static, i32>>();
/// ```
#[must_use = "the monitor is exited as soon as the guard is dropped"]
pub struct MonitorGuard<'a, T> {
    monitor: &'a Monitor<T>,
    _not_send: PhantomData<*const ()>,
}

// SAFETY: a shared guard only hands out `&T`
unsafe impl<T: Sync> Sync for MonitorGuard<'_, T> {}

impl<'a, T> MonitorGuard<'a, T> {
    fn new(monitor: &'a Monitor<T>) -> Self {
        Self {
            monitor,
            _not_send: PhantomData,
        }
    }

    /// Release the monitor until pulsed, then re-enter
    pub fn wait(&mut self) -> SyncResult<()> {
        self.wait_with(&WaitOptions::new())?
            .into_result(PRIMITIVE)
    }

    /// `false` if no pulse arrived within `timeout`; the monitor is re-entered either way
    pub fn wait_timeout(&mut self, timeout: Duration) -> SyncResult<bool> {
        Ok(self.wait_with(&WaitOptions::timeout(timeout))?.is_acquired())
    }

    /// Wait for a pulse with an optional deadline and cancellation token
    pub fn wait_with(&mut self, options: &WaitOptions) -> SyncResult<WaitOutcome> {
        let monitor = self.monitor;
        if options.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }

        // Queue before releasing so a pulse issued right after the release is not lost
        let waiter = Waiter::new(CallerId::current(), options.deadline());
        monitor.condition.lock().push(waiter.clone(), ());
        let registration = attach(options.cancel.as_ref(), &waiter);

        if let Err(e) = monitor.lock.release() {
            monitor.condition.lock().remove(waiter.id());
            return Err(e);
        }

        let mut span = WaitSpan::new(PRIMITIVE, waiter.caller(), waiter.id());
        let state = waiter.park(&monitor.config);
        drop(registration);
        if state != WaiterState::Notified {
            monitor.condition.lock().remove(waiter.id());
            trace!(primitive = PRIMITIVE, ?state, "Condition wait ended without a pulse");
        }
        span.record_outcome(state.outcome());
        drop(span);

        monitor.lock.acquire()?;
        Ok(state.outcome())
    }

    /// Wake one waiter; returns whether anyone was waiting
    pub fn pulse(&self) -> bool {
        let claimed = self.monitor.condition.lock().claim_front();
        claimed.map(|c| c.grant()).is_some()
    }

    /// Wake every waiter; returns how many were woken
    pub fn pulse_all(&self) -> usize {
        let claimed = self.monitor.condition.lock().claim_all();
        claimed.len()
    }
}

impl<T> Deref for MonitorGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive ownership of the monitor lock
        unsafe { &*self.monitor.data.get() }
    }
}

impl<T> DerefMut for MonitorGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive ownership of the monitor lock
        unsafe { &mut *self.monitor.data.get() }
    }
}

impl<T> Drop for MonitorGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.monitor.lock.release() {
            warn!(error = %e, "Monitor guard dropped under a different caller identity");
        }
    }
}
