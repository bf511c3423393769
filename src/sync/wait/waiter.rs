/*!
 * Waiter
 *
 * One blocked caller: identity, a parkable slot and an optional deadline.
 *
 * # Design
 *
 * Parking follows the futex model of `parking_lot_core`: the waiter's own address is the park key,
 * and the validate callback re-checks the state word under the bucket lock, so a wake that races
 * with the decision to sleep is never lost. Async callers store a `Waker` instead.
 *
 * State machine (single CAS out of `WAITING`):
 *
 * ```text
 * WAITING --claim--> CLAIMED --complete--> NOTIFIED
 * WAITING --timeout--> TIMED_OUT
 * WAITING --cancel--> CANCELLED
 * ```
 *
 * A claimed waiter can no longer time out or be cancelled, which is what keeps hand-off free of
 * ghost permits.
 */

use super::outcome::WaitOutcome;
use super::spinwait::spin_until;
use crate::core::CallerId;
use crate::sync::config::SyncConfig;
use parking_lot::Mutex;
use parking_lot_core::{park, unpark_all, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

const WAITING: u8 = 0;
const CLAIMED: u8 = 1;
const NOTIFIED: u8 = 2;
const CANCELLED: u8 = 3;
const TIMED_OUT: u8 = 4;

static NEXT_WAITER: AtomicU64 = AtomicU64::new(1);

/// Observable waiter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaiterState {
    Waiting,
    Claimed,
    Notified,
    Cancelled,
    TimedOut,
}

impl WaiterState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            WAITING => Self::Waiting,
            CLAIMED => Self::Claimed,
            NOTIFIED => Self::Notified,
            CANCELLED => Self::Cancelled,
            _ => Self::TimedOut,
        }
    }

    #[inline]
    pub(crate) fn is_pending(self) -> bool {
        matches!(self, Self::Waiting | Self::Claimed)
    }

    /// Outcome seen by the caller once the waiter is no longer pending
    pub(crate) fn outcome(self) -> WaitOutcome {
        match self {
            Self::Cancelled => WaitOutcome::Cancelled,
            Self::TimedOut => WaitOutcome::TimedOut,
            _ => WaitOutcome::Acquired,
        }
    }
}

/// A blocked caller
pub(crate) struct Waiter {
    id: u64,
    caller: CallerId,
    state: AtomicU8,
    /// Value handed over by whoever completed the wait (e.g. the index of the signaling event)
    payload: AtomicUsize,
    deadline: Option<Instant>,
    task: Mutex<Option<Waker>>,
}

impl Waiter {
    pub(crate) fn new(caller: CallerId, deadline: Option<Instant>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_WAITER.fetch_add(1, Ordering::Relaxed),
            caller,
            state: AtomicU8::new(WAITING),
            payload: AtomicUsize::new(0),
            deadline,
            task: Mutex::new(None),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn caller(&self) -> CallerId {
        self.caller
    }

    #[inline]
    pub(crate) fn state(&self) -> WaiterState {
        WaiterState::from_raw(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn payload(&self) -> usize {
        self.payload.load(Ordering::Acquire)
    }

    /// Take exclusive right to complete this waiter
    #[inline]
    pub(crate) fn try_claim(&self) -> bool {
        self.transition(CLAIMED)
    }

    /// Finish a claimed wait and wake the owner
    pub(crate) fn complete(&self, payload: usize) {
        self.payload.store(payload, Ordering::Relaxed);
        self.state.store(NOTIFIED, Ordering::Release);
        self.wake();
    }

    /// Cancel a still-waiting waiter; returns false if it already left `WAITING`
    pub(crate) fn cancel(&self) -> bool {
        if self.transition(CANCELLED) {
            self.wake();
            true
        } else {
            false
        }
    }

    /// Give up on the wait from the owning side (dropped future, expired deadline)
    ///
    /// Returns the final state. `Notified` means the resource was handed over anyway and the caller
    /// is responsible for it.
    pub(crate) fn abandon(&self) -> WaiterState {
        loop {
            if self.transition(TIMED_OUT) {
                return WaiterState::TimedOut;
            }
            match self.state() {
                // The releaser is mid hand-off; it finishes under its own lock shortly
                WaiterState::Claimed => std::hint::spin_loop(),
                WaiterState::Waiting => continue,
                settled => return settled,
            }
        }
    }

    /// Block the calling thread until the waiter settles or its deadline passes
    pub(crate) fn park(&self, config: &SyncConfig) -> WaiterState {
        spin_until(config.spin_budget(), config.spin_duration, || {
            !self.state().is_pending()
        });

        loop {
            let state = self.state();
            if !state.is_pending() {
                return state;
            }

            if let Some(deadline) = self.deadline {
                if state == WaiterState::Waiting && Instant::now() >= deadline {
                    if self.transition(TIMED_OUT) {
                        return WaiterState::TimedOut;
                    }
                    continue;
                }
            }

            // A claimed waiter must wait for completion regardless of its deadline
            let deadline = match state {
                WaiterState::Claimed => None,
                _ => self.deadline,
            };

            // SAFETY: the key is the address of this waiter, which stays alive for the whole call;
            // the validate closure only reads our own atomic.
            // Every park result (unparked, invalid, timed out) is resolved by re-reading the state.
            unsafe {
                park(
                    self.key(),
                    || self.state().is_pending(),
                    || {},
                    |_, _| {},
                    DEFAULT_PARK_TOKEN,
                    deadline,
                );
            }
        }
    }

    /// Async counterpart of `park` (deadlines are handled by the caller's timer)
    pub(crate) fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<WaiterState> {
        let state = self.state();
        if !state.is_pending() {
            return Poll::Ready(state);
        }

        {
            let mut task = self.task.lock();
            match task.as_ref() {
                Some(existing) if existing.will_wake(cx.waker()) => {}
                _ => *task = Some(cx.waker().clone()),
            }
        }

        // Re-check after publishing the waker so a concurrent completion cannot slip past
        let state = self.state();
        if state.is_pending() {
            Poll::Pending
        } else {
            Poll::Ready(state)
        }
    }

    #[inline]
    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(WAITING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    fn key(&self) -> usize {
        self as *const Self as usize
    }

    fn wake(&self) {
        // SAFETY: unparking an address never dereferences it
        unsafe {
            unpark_all(self.key(), DEFAULT_UNPARK_TOKEN);
        }
        if let Some(waker) = self.task.lock().take() {
            waker.wake();
        }
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("caller", &self.caller)
            .field("state", &self.state())
            .field("deadline", &self.deadline)
            .finish()
    }
}
