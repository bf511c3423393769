/*!
 * Reader-Writer Lock
 *
 * Shared/exclusive lock with a single upgradeable-read slot and an explicit recursion policy.
 *
 * # Modes
 *
 * - Read: shared with other readers and with the upgradeable holder
 * - Upgradeable read: shared with readers, at most one holder; may later enter write without
 *   releasing, waiting only for plain readers to drain
 * - Write: exclusive
 *
 * # Fairness
 *
 * Waiters form one FIFO queue. A newcomer is granted immediately only when its mode is compatible
 * with the current holders *and* nobody is queued, so a queued writer holds back later readers.
 * A pending upgrade likewise holds back new readers.
 *
 * # Recursion
 *
 * Under [`RecursionPolicy::NoRecursion`] any nested entry by a caller that already holds a mode
 * fails fast with `ReentrancyViolation`, except the two nestings the upgradeable mode exists for:
 * read under upgradeable (downgrade) and write under upgradeable (upgrade).
 * [`RecursionPolicy::SupportsRecursion`] tracks per-caller depth per mode and permits compatible
 * nesting. Write or upgradeable nested under a plain read always fails: that pattern deadlocks as
 * soon as two readers try it.
 */

use crate::core::{CallerId, SyncError, SyncResult};
use crate::sync::config::SyncConfig;
use crate::sync::wait::{
    block_on, Claimed, Rendezvous, WaitOptions, WaitOutcome, WaitQueue, Waiter, WaiterState,
};
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const PRIMITIVE: &str = "reader-writer lock";

/// How nested acquisition by the same caller is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecursionPolicy {
    #[default]
    NoRecursion,
    SupportsRecursion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Upgradeable,
    Write,
}

/// Per-caller hold counts
#[derive(Debug, Default, Clone, Copy)]
struct Holds {
    read: usize,
    upgradeable: usize,
    write: usize,
    /// Write was obtained by upgrading, so the upgradeable hold must outlive it
    upgraded: bool,
}

impl Holds {
    fn is_empty(&self) -> bool {
        self.read == 0 && self.upgradeable == 0 && self.write == 0
    }
}

#[derive(Default)]
struct Holdings {
    /// Total read holds across all callers (recursive holds counted individually)
    readers: usize,
    writer: Option<CallerId>,
    upgradeable: Option<CallerId>,
    by_caller: HashMap<CallerId, Holds, RandomState>,
}

impl Holdings {
    fn of(&self, caller: CallerId) -> Holds {
        self.by_caller.get(&caller).copied().unwrap_or_default()
    }

    /// Can a caller holding nothing take `access` right now
    fn grantable(&self, access: Access) -> bool {
        match access {
            Access::Read => self.writer.is_none(),
            Access::Upgradeable => self.writer.is_none() && self.upgradeable.is_none(),
            Access::Write => {
                self.writer.is_none() && self.readers == 0 && self.upgradeable.is_none()
            }
        }
    }

    /// Can the upgradeable holder take write right now
    fn upgrade_ready(&self, caller: CallerId) -> bool {
        self.writer.is_none() && self.readers == self.of(caller).read
    }

    fn grant(&mut self, caller: CallerId, access: Access) {
        let holds = self.by_caller.entry(caller).or_default();
        match access {
            Access::Read => {
                holds.read += 1;
                self.readers += 1;
            }
            Access::Upgradeable => {
                holds.upgradeable += 1;
                self.upgradeable = Some(caller);
            }
            Access::Write => {
                if holds.write == 0 && holds.upgradeable > 0 && self.upgradeable == Some(caller) {
                    holds.upgraded = true;
                }
                holds.write += 1;
                self.writer = Some(caller);
            }
        }
    }

    fn release(&mut self, caller: CallerId, access: Access) -> SyncResult<()> {
        let Some(holds) = self.by_caller.get_mut(&caller) else {
            return Err(not_held(caller, access));
        };
        match access {
            Access::Read if holds.read > 0 => {
                holds.read -= 1;
                self.readers -= 1;
            }
            Access::Upgradeable if holds.upgradeable > 0 => {
                if holds.upgradeable == 1 && holds.write > 0 && holds.upgraded {
                    return Err(SyncError::InvalidState {
                        primitive: PRIMITIVE,
                        detail: "exit write before leaving upgradeable read",
                    });
                }
                holds.upgradeable -= 1;
                if holds.upgradeable == 0 {
                    self.upgradeable = None;
                }
            }
            Access::Write if holds.write > 0 => {
                holds.write -= 1;
                if holds.write == 0 {
                    holds.upgraded = false;
                    self.writer = None;
                }
            }
            _ => return Err(not_held(caller, access)),
        }
        if holds.is_empty() {
            self.by_caller.remove(&caller);
        }
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.by_caller.is_empty()
    }
}

fn not_held(caller: CallerId, access: Access) -> SyncError {
    warn!(primitive = PRIMITIVE, %caller, ?access, "Exit of a mode the caller does not hold");
    SyncError::OwnershipViolation {
        primitive: PRIMITIVE,
    }
}

struct RwState {
    holdings: Holdings,
    queue: WaitQueue<Access>,
    /// Upgradeable holder waiting for readers to drain
    upgrade_waiter: Option<Arc<Waiter>>,
    disposed: bool,
}

impl RwState {
    /// Grant queued requests that became compatible, in FIFO order
    fn dispatch(&mut self) -> Vec<Claimed<Access>> {
        let mut granted = Vec::new();

        if let Some(waiter) = self.upgrade_waiter.take() {
            if waiter.state() == WaiterState::Waiting {
                if !self.holdings.upgrade_ready(waiter.caller()) {
                    self.upgrade_waiter = Some(waiter);
                    return granted;
                }
                if let Some(claimed) = Claimed::try_from_waiter(&waiter, Access::Write) {
                    self.holdings.grant(claimed.caller(), Access::Write);
                    granted.push(claimed);
                    return granted;
                }
            }
        }

        let Self {
            holdings, queue, ..
        } = self;
        loop {
            let Some(claimed) = queue.claim_front_if(|access| holdings.grantable(*access)) else {
                break;
            };
            holdings.grant(claimed.caller(), *claimed.tag());
            granted.push(claimed);
        }
        granted
    }
}

/// Reader-writer lock with upgradeable read
///
/// # Examples
///
/// ```
/// use sync_primitives::sync::ReaderWriterLock;
///
/// let lock = ReaderWriterLock::new();
/// {
///     let upgradeable = lock.upgradeable_read().unwrap();
///     let _write = upgradeable.upgrade().unwrap();
///     assert!(lock.is_write_lock_held());
/// }
/// assert!(!lock.is_upgradeable_read_lock_held());
/// ```
pub struct ReaderWriterLock {
    state: Mutex<RwState>,
    policy: RecursionPolicy,
    config: SyncConfig,
}

/// One pending request; the rendezvous side of an `enter_*` call
struct Request<'a> {
    lock: &'a ReaderWriterLock,
    access: Access,
}

impl ReaderWriterLock {
    pub fn new() -> Self {
        Self::with_policy(RecursionPolicy::NoRecursion)
    }

    pub fn with_policy(policy: RecursionPolicy) -> Self {
        Self {
            state: Mutex::new(RwState {
                holdings: Holdings::default(),
                queue: WaitQueue::new(),
                upgrade_waiter: None,
                disposed: false,
            }),
            policy,
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    #[inline]
    pub fn recursion_policy(&self) -> RecursionPolicy {
        self.policy
    }

    pub fn enter_read(&self) -> SyncResult<()> {
        self.enter(Access::Read, &WaitOptions::new())?
            .into_result(PRIMITIVE)
    }

    pub fn enter_write(&self) -> SyncResult<()> {
        self.enter(Access::Write, &WaitOptions::new())?
            .into_result(PRIMITIVE)
    }

    pub fn enter_upgradeable_read(&self) -> SyncResult<()> {
        self.enter(Access::Upgradeable, &WaitOptions::new())?
            .into_result(PRIMITIVE)
    }

    /// `false` if the lock could not be taken within `timeout`
    pub fn try_enter_read(&self, timeout: Duration) -> SyncResult<bool> {
        Ok(self
            .enter(Access::Read, &WaitOptions::timeout(timeout))?
            .is_acquired())
    }

    pub fn try_enter_write(&self, timeout: Duration) -> SyncResult<bool> {
        Ok(self
            .enter(Access::Write, &WaitOptions::timeout(timeout))?
            .is_acquired())
    }

    pub fn try_enter_upgradeable_read(&self, timeout: Duration) -> SyncResult<bool> {
        Ok(self
            .enter(Access::Upgradeable, &WaitOptions::timeout(timeout))?
            .is_acquired())
    }

    pub fn enter_read_with(&self, options: &WaitOptions) -> SyncResult<WaitOutcome> {
        self.enter(Access::Read, options)
    }

    pub fn enter_write_with(&self, options: &WaitOptions) -> SyncResult<WaitOutcome> {
        self.enter(Access::Write, options)
    }

    pub fn enter_upgradeable_read_with(&self, options: &WaitOptions) -> SyncResult<WaitOutcome> {
        self.enter(Access::Upgradeable, options)
    }

    pub fn exit_read(&self) -> SyncResult<()> {
        self.exit(Access::Read)
    }

    pub fn exit_write(&self) -> SyncResult<()> {
        self.exit(Access::Write)
    }

    pub fn exit_upgradeable_read(&self) -> SyncResult<()> {
        self.exit(Access::Upgradeable)
    }

    pub fn read(&self) -> SyncResult<ReadGuard<'_>> {
        self.enter_read()?;
        Ok(ReadGuard(Held::new(self, Access::Read)))
    }

    pub fn write(&self) -> SyncResult<WriteGuard<'_>> {
        self.enter_write()?;
        Ok(WriteGuard(Held::new(self, Access::Write)))
    }

    pub fn upgradeable_read(&self) -> SyncResult<UpgradeableReadGuard<'_>> {
        self.enter_upgradeable_read()?;
        Ok(UpgradeableReadGuard(Held::new(self, Access::Upgradeable)))
    }

    /// Total read holds across all callers
    pub fn current_read_count(&self) -> usize {
        self.state.lock().holdings.readers
    }

    pub fn is_read_lock_held(&self) -> bool {
        self.holds_of_current().read > 0
    }

    pub fn is_write_lock_held(&self) -> bool {
        self.holds_of_current().write > 0
    }

    pub fn is_upgradeable_read_lock_held(&self) -> bool {
        self.holds_of_current().upgradeable > 0
    }

    /// Read depth of the calling identity
    pub fn recursive_read_count(&self) -> usize {
        self.holds_of_current().read
    }

    pub fn recursive_write_count(&self) -> usize {
        self.holds_of_current().write
    }

    pub fn waiting_read_count(&self) -> usize {
        self.state
            .lock()
            .queue
            .count_where(|access| *access == Access::Read)
    }

    /// Queued writers, including a pending upgrade
    pub fn waiting_write_count(&self) -> usize {
        let state = self.state.lock();
        let upgrading = state
            .upgrade_waiter
            .as_ref()
            .is_some_and(|w| w.state() == WaiterState::Waiting);
        state.queue.count_where(|access| *access == Access::Write) + usize::from(upgrading)
    }

    pub fn waiting_upgradeable_count(&self) -> usize {
        self.state
            .lock()
            .queue
            .count_where(|access| *access == Access::Upgradeable)
    }

    /// Tear down; refused while any mode is held or callers are queued
    pub fn dispose(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        if !state.holdings.is_idle() {
            return Err(SyncError::DisposeWhileInUse {
                primitive: PRIMITIVE,
                detail: "lock is held",
            });
        }
        if state.queue.has_waiters() {
            return Err(SyncError::DisposeWhileInUse {
                primitive: PRIMITIVE,
                detail: "callers are waiting",
            });
        }
        state.disposed = true;
        Ok(())
    }

    fn holds_of_current(&self) -> Holds {
        self.state.lock().holdings.of(CallerId::current())
    }

    fn enter(&self, access: Access, options: &WaitOptions) -> SyncResult<WaitOutcome> {
        let request = Request { lock: self, access };
        block_on(&request, CallerId::current(), options, &self.config)
    }

    fn exit(&self, access: Access) -> SyncResult<()> {
        let granted = {
            let mut state = self.state.lock();
            state.holdings.release(CallerId::current(), access)?;
            state.dispatch()
        };
        drop(granted);
        Ok(())
    }

    fn violation(&self, caller: CallerId, detail: &'static str) -> SyncError {
        warn!(primitive = PRIMITIVE, %caller, policy = ?self.policy, detail, "Illegal nested acquisition");
        SyncError::ReentrancyViolation {
            primitive: PRIMITIVE,
            detail,
        }
    }

    /// Decide a request by a caller that already holds some mode
    ///
    /// `Ok(Some(true))` grants immediately, `Ok(Some(false))` means "wait for an upgrade",
    /// `Ok(None)` falls through to the normal path.
    fn nested(&self, held: Holds, caller: CallerId, access: Access) -> SyncResult<Option<bool>> {
        let recursive = self.policy == RecursionPolicy::SupportsRecursion;
        match access {
            Access::Read => {
                if held.upgradeable > 0 && held.write == 0 && held.read == 0 {
                    return Ok(Some(true));
                }
                if held.is_empty() {
                    return Ok(None);
                }
                if recursive {
                    Ok(Some(true))
                } else {
                    Err(self.violation(caller, "read lock re-entered"))
                }
            }
            Access::Write => {
                if held.write > 0 {
                    return if recursive {
                        Ok(Some(true))
                    } else {
                        Err(self.violation(caller, "write lock re-entered"))
                    };
                }
                if held.read > 0 && held.upgradeable == 0 {
                    return Err(self.violation(caller, "write lock requested while holding read"));
                }
                if held.upgradeable > 0 {
                    return Ok(Some(false));
                }
                Ok(None)
            }
            Access::Upgradeable => {
                if held.is_empty() {
                    return Ok(None);
                }
                if held.read > 0 && held.upgradeable == 0 {
                    return Err(self.violation(
                        caller,
                        "upgradeable lock requested while holding read",
                    ));
                }
                if recursive {
                    Ok(Some(true))
                } else {
                    Err(self.violation(caller, "upgradeable lock re-entered"))
                }
            }
        }
    }
}

impl Rendezvous for Request<'_> {
    fn primitive(&self) -> &'static str {
        PRIMITIVE
    }

    fn acquire_or_enqueue(&self, waiter: &Arc<Waiter>) -> SyncResult<bool> {
        let caller = waiter.caller();
        let mut state = self.lock.state.lock();
        if state.disposed {
            return Err(SyncError::DisposedObjectUse {
                primitive: PRIMITIVE,
            });
        }

        let held = state.holdings.of(caller);
        match self.lock.nested(held, caller, self.access)? {
            Some(true) => {
                state.holdings.grant(caller, self.access);
                Ok(true)
            }
            Some(false) => {
                if state.holdings.upgrade_ready(caller) {
                    state.holdings.grant(caller, Access::Write);
                    Ok(true)
                } else {
                    state.upgrade_waiter = Some(Arc::clone(waiter));
                    Ok(false)
                }
            }
            None => {
                let blocked_by_queue = state.queue.has_waiters()
                    || state
                        .upgrade_waiter
                        .as_ref()
                        .is_some_and(|w| w.state() == WaiterState::Waiting);
                if !blocked_by_queue && state.holdings.grantable(self.access) {
                    state.holdings.grant(caller, self.access);
                    Ok(true)
                } else {
                    state.queue.push(Arc::clone(waiter), self.access);
                    Ok(false)
                }
            }
        }
    }

    fn withdraw(&self, waiter: &Waiter) {
        let granted = {
            let mut state = self.lock.state.lock();
            if state
                .upgrade_waiter
                .as_ref()
                .is_some_and(|w| w.id() == waiter.id())
            {
                state.upgrade_waiter = None;
            } else {
                state.queue.remove(waiter.id());
            }
            // A departed writer may have been holding back readers behind it
            state.dispatch()
        };
        drop(granted);
    }
}

impl Default for ReaderWriterLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReaderWriterLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReaderWriterLock")
            .field("readers", &state.holdings.readers)
            .field("writer", &state.holdings.writer)
            .field("upgradeable", &state.holdings.upgradeable)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Exits its mode on drop
struct Held<'a> {
    lock: &'a ReaderWriterLock,
    access: Access,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Held<'a> {
    fn new(lock: &'a ReaderWriterLock, access: Access) -> Self {
        Self {
            lock,
            access,
            _not_send: PhantomData,
        }
    }
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.exit(self.access) {
            warn!(error = %e, access = ?self.access, "Lock guard failed to exit");
        }
    }
}

#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a>(Held<'a>);

#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a>(Held<'a>);

#[must_use = "the upgradeable read lock is released as soon as the guard is dropped"]
pub struct UpgradeableReadGuard<'a>(Held<'a>);

impl<'a> UpgradeableReadGuard<'a> {
    /// Enter write mode; the returned guard must be dropped before this one
    pub fn upgrade(&self) -> SyncResult<WriteGuard<'a>> {
        self.0.lock.enter_write()?;
        Ok(WriteGuard(Held::new(self.0.lock, Access::Write)))
    }

    pub fn try_upgrade(&self, timeout: Duration) -> SyncResult<Option<WriteGuard<'a>>> {
        Ok(self
            .0
            .lock
            .try_enter_write(timeout)?
            .then(|| WriteGuard(Held::new(self.0.lock, Access::Write))))
    }
}
