/*!
 * Event
 *
 * Manual-reset and auto-reset signaling.
 *
 * - Manual: `set` opens the gate until `reset`; every wait, present or future, passes (broadcast,
 *   level-triggered)
 * - Auto: `set` releases exactly one blocked waiter and closes again; with nobody waiting the signal
 *   is latched for exactly the next wait (single-slot memory, edge-triggered)
 *
 * The signaled flag and the waiter queue live under one lock, so a `set` racing with a new wait
 * either finds the waiter queued or leaves the flag for it to observe.
 */

use crate::core::{CallerId, SyncError, SyncResult};
use crate::monitoring::WaitSpan;
use crate::sync::config::SyncConfig;
use crate::sync::wait::{
    attach, block_on, wait_async, Claimed, Rendezvous, WaitOptions, WaitOutcome, WaitQueue, Waiter,
    WaiterState,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

const PRIMITIVE: &str = "event";

/// What happens to the gate after a waiter passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Manual,
    Auto,
}

/// Result of waiting on several events at once
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnyOutcome {
    /// Index of the event that released the wait
    Signaled(usize),
    TimedOut,
    Cancelled,
}

struct EventState {
    signaled: bool,
    /// Tag: the event's index in a `wait_any` call (0 for plain waits)
    waiters: WaitQueue<usize>,
    disposed: bool,
}

impl EventState {
    /// Let one waiter pass on an open gate, closing it if auto-reset
    fn consume(&mut self, mode: ResetMode) -> bool {
        if !self.signaled {
            return false;
        }
        if mode == ResetMode::Auto {
            self.signaled = false;
        }
        true
    }
}

/// Manual or auto-reset event
///
/// # Examples
///
/// ```
/// use sync_primitives::sync::{Event, ResetMode};
/// use std::time::Duration;
///
/// let event = Event::new(ResetMode::Auto, false);
/// event.set().unwrap();
/// assert!(event.wait_timeout(Duration::ZERO).unwrap()); // latched signal consumed
/// assert!(!event.wait_timeout(Duration::ZERO).unwrap());
/// ```
pub struct Event {
    mode: ResetMode,
    state: Mutex<EventState>,
    config: SyncConfig,
}

impl Event {
    pub fn new(mode: ResetMode, initially_set: bool) -> Self {
        Self::with_config(mode, initially_set, SyncConfig::default())
    }

    pub fn manual(initially_set: bool) -> Self {
        Self::new(ResetMode::Manual, initially_set)
    }

    pub fn auto(initially_set: bool) -> Self {
        Self::new(ResetMode::Auto, initially_set)
    }

    pub fn with_config(mode: ResetMode, initially_set: bool, config: SyncConfig) -> Self {
        Self {
            mode,
            state: Mutex::new(EventState {
                signaled: initially_set,
                waiters: WaitQueue::new(),
                disposed: false,
            }),
            config,
        }
    }

    #[inline]
    pub fn mode(&self) -> ResetMode {
        self.mode
    }

    /// Signal the event
    pub fn set(&self) -> SyncResult<()> {
        let woken = {
            let mut state = self.state.lock();
            if state.disposed {
                return Err(disposed());
            }
            match self.mode {
                ResetMode::Manual => {
                    state.signaled = true;
                    state.waiters.claim_all()
                }
                ResetMode::Auto => match state.waiters.claim_front() {
                    Some(claimed) => vec![claimed],
                    None => {
                        state.signaled = true;
                        Vec::new()
                    }
                },
            }
        };
        trace!(primitive = PRIMITIVE, mode = ?self.mode, woken = woken.len(), "Set");
        for mut claimed in woken {
            let index = *claimed.tag();
            claimed.set_payload(index);
        }
        Ok(())
    }

    /// Close the gate
    pub fn reset(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(disposed());
        }
        state.signaled = false;
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().signaled
    }

    /// Block until signaled
    pub fn wait(&self) -> SyncResult<()> {
        self.wait_with(&WaitOptions::new())?
            .into_result(PRIMITIVE)
    }

    /// `false` if not signaled within `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        Ok(self
            .wait_with(&WaitOptions::timeout(timeout))?
            .is_acquired())
    }

    pub fn wait_with(&self, options: &WaitOptions) -> SyncResult<WaitOutcome> {
        block_on(self, CallerId::current(), options, &self.config)
    }

    /// Suspend until signaled; a timeout requires a tokio runtime with the time driver enabled
    pub async fn wait_async(&self, options: WaitOptions) -> SyncResult<WaitOutcome> {
        wait_async(self, options).await
    }

    /// Wait until any of `events` is signaled
    ///
    /// Events are checked in order, so the lowest already-signaled index wins. An auto-reset signal is
    /// consumed only by the event whose index is returned.
    pub fn wait_any(events: &[&Event], options: &WaitOptions) -> SyncResult<AnyOutcome> {
        if events.is_empty() {
            return Err(SyncError::InvalidArgument {
                primitive: PRIMITIVE,
                detail: "wait_any needs at least one event",
            });
        }
        if options.is_cancelled() {
            return Ok(AnyOutcome::Cancelled);
        }

        let waiter = Waiter::new(CallerId::current(), options.deadline());
        let mut enqueued = 0;
        let mut failure = None;

        for (index, event) in events.iter().enumerate() {
            let mut state = event.state.lock();
            if state.disposed {
                failure = Some(disposed());
                break;
            }
            if waiter.state() != WaiterState::Waiting {
                // Claimed by an event we already queued on
                break;
            }
            if state.signaled {
                if let Some(mut claimed) = Claimed::try_from_waiter(&waiter, index) {
                    state.consume(event.mode);
                    claimed.set_payload(index);
                }
                break;
            }
            state.waiters.push(Arc::clone(&waiter), index);
            enqueued = index + 1;
        }

        let state = match failure {
            Some(_) => waiter.abandon(),
            None => {
                let mut span = WaitSpan::new(PRIMITIVE, waiter.caller(), waiter.id());
                let registration = attach(options.cancel.as_ref(), &waiter);
                let state = waiter.park(&events[0].config);
                drop(registration);
                span.record_outcome(state.outcome());
                state
            }
        };

        for event in &events[..enqueued] {
            event.state.lock().waiters.remove(waiter.id());
        }

        if let Some(e) = failure {
            if state == WaiterState::Notified {
                // An earlier auto-reset event handed us its signal; give it back
                let index = waiter.payload();
                events[index].restore();
            }
            return Err(e);
        }

        Ok(match state {
            WaiterState::Notified => AnyOutcome::Signaled(waiter.payload()),
            WaiterState::Cancelled => AnyOutcome::Cancelled,
            _ => AnyOutcome::TimedOut,
        })
    }

    /// Tear down; refused while callers are waiting
    pub fn dispose(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.waiters.has_waiters() {
            return Err(SyncError::DisposeWhileInUse {
                primitive: PRIMITIVE,
                detail: "callers are waiting",
            });
        }
        state.disposed = true;
        Ok(())
    }

    pub(crate) fn has_waiters(&self) -> bool {
        self.state.lock().waiters.has_waiters()
    }
}

fn disposed() -> SyncError {
    SyncError::DisposedObjectUse {
        primitive: PRIMITIVE,
    }
}

impl Rendezvous for Event {
    fn primitive(&self) -> &'static str {
        PRIMITIVE
    }

    fn acquire_or_enqueue(&self, waiter: &Arc<Waiter>) -> SyncResult<bool> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(disposed());
        }
        if state.consume(self.mode) {
            return Ok(true);
        }
        state.waiters.push(Arc::clone(waiter), 0);
        Ok(false)
    }

    fn withdraw(&self, waiter: &Waiter) {
        self.state.lock().waiters.remove(waiter.id());
    }

    /// An auto-reset signal handed to a dropped wait passes on to the next waiter
    fn restore(&self) {
        if self.mode == ResetMode::Auto {
            if let Err(e) = self.set() {
                warn!(error = %e, "Could not pass on signal of a dropped wait");
            }
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("mode", &self.mode)
            .field("set", &self.is_set())
            .finish()
    }
}
