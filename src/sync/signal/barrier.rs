/*!
 * Cyclic Barrier
 *
 * Repeatable phase synchronization with an optional post-phase action and dynamic membership.
 *
 * # Phase protocol
 *
 * Arrival, phase completion and membership changes run under a reentrant gate lock. The arrival that
 * makes `arrived == participants` claims every waiter of the phase in the same critical section, so
 * none of them can time out of a phase that is already complete. It then runs the post-phase action
 * exactly once, still holding the gate (so the action may inspect or adjust the barrier from the same
 * thread), and releases the claimed waiters. `arrived` and the phase number are advanced together
 * with the claim, so the action already observes the next phase as the forming one. A failing
 * or panicking action is delivered to every waiter as `PostPhaseActionFailure`; the phase advances
 * regardless.
 *
 * # Breaking
 *
 * A waiter that times out or is cancelled breaks the barrier: the other waiters of the in-flight
 * phase are released with `BrokenBarrier`, and later arrivals fail immediately until `reset`.
 */

use crate::core::{BoxError, CallerId, PhaseActionError, SyncError, SyncResult};
use crate::monitoring::WaitSpan;
use crate::sync::config::SyncConfig;
use crate::sync::locks::{MutexGuard, ReentrantMutex};
use crate::sync::wait::{attach, Claimed, WaitOptions, WaitOutcome, WaitQueue, Waiter, WaiterState};
use parking_lot::{Mutex, MutexGuard as StateGuard};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

const PRIMITIVE: &str = "barrier";

type PhaseResult = SyncResult<()>;
type PhaseSlot = Arc<OnceLock<PhaseResult>>;
type PhaseAction = Box<dyn Fn(&PhaseContext) -> Result<(), BoxError> + Send + Sync>;

/// What the post-phase action is told about the phase that just completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseContext {
    pub phase: u64,
    pub participants: usize,
}

struct BarrierState {
    participants: usize,
    arrived: usize,
    phase: u64,
    broken: bool,
    disposed: bool,
    waiters: WaitQueue<PhaseSlot>,
}

impl BarrierState {
    fn check_usable(&self) -> SyncResult<()> {
        if self.disposed {
            return Err(SyncError::DisposedObjectUse {
                primitive: PRIMITIVE,
            });
        }
        if self.broken {
            return Err(SyncError::BrokenBarrier { phase: self.phase });
        }
        Ok(())
    }

    /// Release every queued waiter with `result`
    fn release_all(&mut self, result: &PhaseResult) -> Vec<Claimed<PhaseSlot>> {
        let released = self.waiters.claim_all();
        for claimed in &released {
            let _ = claimed.tag().set(result.clone());
        }
        released
    }
}

/// Cyclic barrier
///
/// # Examples
///
/// ```
/// use sync_primitives::sync::CyclicBarrier;
/// use std::sync::Arc;
/// use std::thread;
///
/// let barrier = Arc::new(CyclicBarrier::new(2).unwrap());
/// let other = {
///     let barrier = barrier.clone();
///     thread::spawn(move || barrier.signal_and_wait())
/// };
/// barrier.signal_and_wait().unwrap();
/// other.join().unwrap().unwrap();
/// assert_eq!(barrier.phase_number(), 1);
/// ```
pub struct CyclicBarrier {
    gate: ReentrantMutex,
    state: Mutex<BarrierState>,
    action: Option<PhaseAction>,
    config: SyncConfig,
}

impl CyclicBarrier {
    pub fn new(participants: usize) -> SyncResult<Self> {
        if participants == 0 {
            return Err(SyncError::InvalidArgument {
                primitive: PRIMITIVE,
                detail: "participant count must be at least 1",
            });
        }
        Ok(Self {
            gate: ReentrantMutex::new(),
            state: Mutex::new(BarrierState {
                participants,
                arrived: 0,
                phase: 0,
                broken: false,
                disposed: false,
                waiters: WaitQueue::new(),
            }),
            action: None,
            config: SyncConfig::default(),
        })
    }

    /// Barrier running `action` after every phase, before any waiter is released
    pub fn with_action<F>(participants: usize, action: F) -> SyncResult<Self>
    where
        F: Fn(&PhaseContext) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let mut barrier = Self::new(participants)?;
        barrier.action = Some(Box::new(action));
        Ok(barrier)
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.gate = ReentrantMutex::with_config(config.clone());
        self.config = config;
        self
    }

    /// Arrive and block until every participant of the phase has arrived
    pub fn signal_and_wait(&self) -> SyncResult<()> {
        self.signal_and_wait_with(&WaitOptions::new())?
            .into_result(PRIMITIVE)
    }

    /// `false` if the phase did not complete within `timeout`; the barrier is then broken
    pub fn signal_and_wait_timeout(&self, timeout: Duration) -> SyncResult<bool> {
        Ok(self
            .signal_and_wait_with(&WaitOptions::timeout(timeout))?
            .is_acquired())
    }

    pub fn signal_and_wait_with(&self, options: &WaitOptions) -> SyncResult<WaitOutcome> {
        let gate = self.gate.lock()?;
        let mut state = self.state.lock();
        state.check_usable()?;
        if state.participants == 0 {
            return Err(SyncError::InvalidState {
                primitive: PRIMITIVE,
                detail: "barrier has no participants",
            });
        }

        state.arrived += 1;
        if state.arrived == state.participants {
            return self
                .complete_phase(gate, state)
                .map(|_| WaitOutcome::Acquired);
        }

        if options.is_cancelled() {
            return Ok(self.break_phase(&mut state, WaitOutcome::Cancelled, None));
        }

        let phase = state.phase;
        let slot: PhaseSlot = Arc::new(OnceLock::new());
        let waiter = Waiter::new(CallerId::current(), options.deadline());
        state.waiters.push(Arc::clone(&waiter), Arc::clone(&slot));
        drop(state);
        drop(gate);

        let mut span = WaitSpan::new(PRIMITIVE, waiter.caller(), waiter.id());
        let registration = attach(options.cancel.as_ref(), &waiter);
        let outcome = waiter.park(&self.config);
        drop(registration);
        span.record_outcome(outcome.outcome());
        drop(span);

        if outcome == WaiterState::Notified {
            return match slot.get() {
                Some(Err(e)) => Err(e.clone()),
                _ => Ok(WaitOutcome::Acquired),
            };
        }

        let mut state = self.state.lock();
        if state.phase == phase {
            Ok(self.break_phase(&mut state, outcome.outcome(), Some(&waiter)))
        } else {
            // The phase completed without us; our arrival still counted
            state.waiters.remove(waiter.id());
            Ok(outcome.outcome())
        }
    }

    /// Add one participant; returns the phase the new participant joins
    pub fn add_participant(&self) -> SyncResult<u64> {
        self.add_participants(1)
    }

    pub fn add_participants(&self, n: usize) -> SyncResult<u64> {
        let _gate = self.gate.lock()?;
        let mut state = self.state.lock();
        if state.disposed {
            return Err(SyncError::DisposedObjectUse {
                primitive: PRIMITIVE,
            });
        }
        state.participants = state
            .participants
            .checked_add(n)
            .ok_or(SyncError::CountOverflow {
                primitive: PRIMITIVE,
                requested: n,
                current: state.participants,
                max: usize::MAX,
            })?;
        debug!(primitive = PRIMITIVE, participants = state.participants, phase = state.phase, "Participants added");
        Ok(state.phase)
    }

    pub fn remove_participant(&self) -> SyncResult<()> {
        self.remove_participants(1)
    }

    /// Remove `n` participants from the currently forming phase
    ///
    /// Fails with `InvalidState` if fewer participants would remain than have already arrived. If every
    /// remaining participant has arrived, the phase completes immediately on this call.
    pub fn remove_participants(&self, n: usize) -> SyncResult<()> {
        let gate = self.gate.lock()?;
        let mut state = self.state.lock();
        if state.disposed {
            return Err(SyncError::DisposedObjectUse {
                primitive: PRIMITIVE,
            });
        }
        if n > state.participants {
            return Err(SyncError::CountUnderflow {
                primitive: PRIMITIVE,
                requested: n,
                remaining: state.participants,
            });
        }
        let remaining = state.participants - n;
        if remaining < state.arrived {
            return Err(SyncError::InvalidState {
                primitive: PRIMITIVE,
                detail: "more participants already arrived than would remain",
            });
        }

        state.participants = remaining;
        debug!(primitive = PRIMITIVE, participants = remaining, phase = state.phase, "Participants removed");
        if state.arrived > 0 && state.arrived == remaining && !state.broken {
            // Waiters receive any action failure; membership change itself succeeded
            let _ = self.complete_phase(gate, state);
        }
        Ok(())
    }

    /// Release current waiters with `BrokenBarrier` and make the barrier usable again
    ///
    /// The phase number is kept.
    pub fn reset(&self) -> SyncResult<()> {
        let _gate = self.gate.lock()?;
        let released = {
            let mut state = self.state.lock();
            if state.disposed {
                return Err(SyncError::DisposedObjectUse {
                    primitive: PRIMITIVE,
                });
            }
            let phase = state.phase;
            let released = state.release_all(&Err(SyncError::BrokenBarrier { phase }));
            state.arrived = 0;
            state.broken = false;
            debug!(primitive = PRIMITIVE, phase, released = released.len(), "Reset");
            released
        };
        drop(released);
        Ok(())
    }

    /// Number of completed phases
    pub fn phase_number(&self) -> u64 {
        self.state.lock().phase
    }

    pub fn participant_count(&self) -> usize {
        self.state.lock().participants
    }

    /// Participants that still have to arrive in the current phase
    pub fn participants_remaining(&self) -> usize {
        let state = self.state.lock();
        state.participants - state.arrived
    }

    pub fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    /// Tear down; refused while participants are waiting
    pub fn dispose(&self) -> SyncResult<()> {
        let _gate = self.gate.lock()?;
        let mut state = self.state.lock();
        if state.waiters.has_waiters() {
            return Err(SyncError::DisposeWhileInUse {
                primitive: PRIMITIVE,
                detail: "participants are waiting",
            });
        }
        state.disposed = true;
        Ok(())
    }

    /// Run the action and release the phase; the caller holds the gate and the phase is full
    fn complete_phase(
        &self,
        gate: MutexGuard<'_>,
        mut state: StateGuard<'_, BarrierState>,
    ) -> PhaseResult {
        // Claimed waiters ignore their deadlines and cancel tokens from here on. Advancing the phase in
        // the same critical section keeps a waiter that expired just before the claim from breaking it.
        let released = state.waiters.claim_all();
        let context = PhaseContext {
            phase: state.phase,
            participants: state.participants,
        };
        state.arrived = 0;
        state.phase += 1;
        drop(state);

        let result = self.run_action(&context);
        for claimed in &released {
            let _ = claimed.tag().set(result.clone());
        }
        debug!(primitive = PRIMITIVE, phase = context.phase, released = released.len(), "Phase completed");
        drop(gate);
        drop(released);
        result
    }

    fn run_action(&self, context: &PhaseContext) -> PhaseResult {
        let Some(action) = &self.action else {
            return Ok(());
        };

        let source = match catch_unwind(AssertUnwindSafe(|| action(context))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => PhaseActionError::new(e),
            Err(payload) => PhaseActionError::from_panic(payload),
        };
        warn!(primitive = PRIMITIVE, phase = context.phase, error = %source, "Post-phase action failed");
        Err(SyncError::PostPhaseActionFailure {
            phase: context.phase,
            source,
        })
    }

    /// Mark the in-flight phase broken and release its waiters
    fn break_phase(
        &self,
        state: &mut BarrierState,
        outcome: WaitOutcome,
        departed: Option<&Arc<Waiter>>,
    ) -> WaitOutcome {
        if let Some(waiter) = departed {
            state.waiters.remove(waiter.id());
        }
        state.broken = true;
        let phase = state.phase;
        let released = state.release_all(&Err(SyncError::BrokenBarrier { phase }));
        warn!(primitive = PRIMITIVE, phase, ?outcome, released = released.len(), "Barrier broken");
        drop(released);
        outcome
    }
}

impl fmt::Debug for CyclicBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CyclicBarrier")
            .field("participants", &state.participants)
            .field("arrived", &state.arrived)
            .field("phase", &state.phase)
            .field("broken", &state.broken)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_rejects_zero_participants() {
        assert!(CyclicBarrier::new(0).is_err());
    }

    #[test]
    fn test_single_participant_advances() {
        let barrier = CyclicBarrier::new(1).unwrap();
        barrier.signal_and_wait().unwrap();
        barrier.signal_and_wait().unwrap();
        assert_eq!(barrier.phase_number(), 2);
    }

    #[test]
    fn test_action_sees_phase_and_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = {
            let runs = runs.clone();
            Arc::new(
                CyclicBarrier::with_action(3, move |ctx| {
                    assert_eq!(ctx.participants, 3);
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap(),
            )
        };

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || barrier.signal_and_wait())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.phase_number(), 1);
    }

    #[test]
    fn test_panicking_action_reported() {
        let barrier = CyclicBarrier::with_action(1, |_| panic!("boom")).unwrap();
        let err = barrier.signal_and_wait().unwrap_err();
        match err {
            SyncError::PostPhaseActionFailure { phase, source } => {
                assert_eq!(phase, 0);
                assert!(source.to_string().contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(barrier.phase_number(), 1);
        assert!(!barrier.is_broken());
    }

    #[test]
    fn test_timeout_breaks_barrier() {
        let barrier = CyclicBarrier::new(2).unwrap();
        assert!(!barrier
            .signal_and_wait_timeout(Duration::from_millis(10))
            .unwrap());
        assert!(barrier.is_broken());
        assert!(matches!(
            barrier.signal_and_wait(),
            Err(SyncError::BrokenBarrier { phase: 0 })
        ));

        barrier.reset().unwrap();
        assert!(!barrier.is_broken());
        assert_eq!(barrier.participants_remaining(), 2);
    }

    #[test]
    fn test_remove_completes_phase() {
        let barrier = Arc::new(CyclicBarrier::new(2).unwrap());
        let waiter = {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.signal_and_wait())
        };
        while barrier.participants_remaining() != 1 {
            thread::yield_now();
        }

        barrier.remove_participant().unwrap();
        waiter.join().unwrap().unwrap();
        assert_eq!(barrier.phase_number(), 1);
        assert_eq!(barrier.participant_count(), 1);
    }

    #[test]
    fn test_remove_below_arrived_rejected() {
        let barrier = Arc::new(CyclicBarrier::new(3).unwrap());
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || barrier.signal_and_wait())
            })
            .collect();
        while barrier.participants_remaining() != 1 {
            thread::yield_now();
        }

        assert!(matches!(
            barrier.remove_participants(2),
            Err(SyncError::InvalidState { .. })
        ));
        barrier.signal_and_wait().unwrap();
        for waiter in waiters {
            waiter.join().unwrap().unwrap();
        }
    }

    #[test]
    fn test_action_may_add_participant() {
        let barrier = Arc::new_cyclic(|weak: &std::sync::Weak<CyclicBarrier>| {
            let weak = weak.clone();
            CyclicBarrier::with_action(1, move |ctx| {
                if ctx.phase == 0 {
                    if let Some(barrier) = weak.upgrade() {
                        barrier.add_participant()?;
                    }
                }
                Ok(())
            })
            .unwrap()
        });

        barrier.signal_and_wait().unwrap();
        assert_eq!(barrier.participant_count(), 2);
    }
}
