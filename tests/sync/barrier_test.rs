/*!
 * Cyclic barrier tests
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use sync_primitives::sync::{CyclicBarrier, PhaseContext};
use sync_primitives::SyncError;

fn run_participants(
    barrier: &Arc<CyclicBarrier>,
    count: usize,
    phases: usize,
) -> Vec<Result<(), SyncError>> {
    let handles: Vec<_> = (0..count)
        .map(|_| {
            let barrier = barrier.clone();
            thread::spawn(move || -> Result<(), SyncError> {
                for _ in 0..phases {
                    barrier.signal_and_wait()?;
                }
                Ok(())
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_phases_advance_with_action_once_each() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let barrier = {
        let seen = seen.clone();
        Arc::new(
            CyclicBarrier::with_action(3, move |ctx: &PhaseContext| {
                seen.lock().push(ctx.phase);
                Ok(())
            })
            .unwrap(),
        )
    };

    for result in run_participants(&barrier, 3, 2) {
        result.unwrap();
    }
    assert_eq!(barrier.phase_number(), 2);
    assert_eq!(*seen.lock(), vec![0, 1]);
    assert_eq!(barrier.participants_remaining(), 3);
}

#[test]
fn test_action_failure_reaches_every_participant() {
    let barrier = Arc::new(
        CyclicBarrier::with_action(3, |ctx| {
            if ctx.phase == 0 {
                return Err("checkpoint failed".into());
            }
            Ok(())
        })
        .unwrap(),
    );

    let results = run_participants(&barrier, 3, 1);
    for result in results {
        match result {
            Err(SyncError::PostPhaseActionFailure { phase, source }) => {
                assert_eq!(phase, 0);
                assert_eq!(source.to_string(), "checkpoint failed");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
    // The phase advanced and the barrier stays usable
    assert_eq!(barrier.phase_number(), 1);
    for result in run_participants(&barrier, 3, 1) {
        result.unwrap();
    }
}

#[test]
fn test_timeout_breaks_then_reset_recovers() {
    let barrier = Arc::new(CyclicBarrier::new(3).unwrap());

    let patient = {
        let barrier = barrier.clone();
        thread::spawn(move || barrier.signal_and_wait())
    };
    let impatient = barrier
        .signal_and_wait_timeout(Duration::from_millis(20))
        .unwrap();
    assert!(!impatient);

    assert!(matches!(
        patient.join().unwrap(),
        Err(SyncError::BrokenBarrier { phase: 0 })
    ));
    assert!(barrier.is_broken());

    barrier.reset().unwrap();
    assert!(!barrier.is_broken());
    for result in run_participants(&barrier, 3, 1) {
        result.unwrap();
    }
    assert_eq!(barrier.phase_number(), 1);
}

#[test]
fn test_membership_changes_between_phases() {
    let barrier = Arc::new(CyclicBarrier::new(2).unwrap());
    assert_eq!(barrier.add_participant().unwrap(), 0);
    assert_eq!(barrier.participant_count(), 3);

    for result in run_participants(&barrier, 3, 1) {
        result.unwrap();
    }

    barrier.remove_participants(2).unwrap();
    barrier.signal_and_wait().unwrap();
    assert_eq!(barrier.phase_number(), 2);

    assert!(matches!(
        barrier.remove_participants(2),
        Err(SyncError::CountUnderflow { .. })
    ));
}

#[test]
fn test_removing_last_straggler_completes_phase() {
    let runs = Arc::new(AtomicUsize::new(0));
    let barrier = {
        let runs = runs.clone();
        Arc::new(
            CyclicBarrier::with_action(3, move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap(),
        )
    };

    let arrived: Vec<_> = (0..2)
        .map(|_| {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.signal_and_wait())
        })
        .collect();
    while barrier.participants_remaining() != 1 {
        thread::yield_now();
    }

    barrier.remove_participant().unwrap();
    for handle in arrived {
        handle.join().unwrap().unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(barrier.phase_number(), 1);
}

#[test]
fn test_dispose_when_idle() {
    let barrier = CyclicBarrier::new(2).unwrap();
    barrier.dispose().unwrap();
    assert!(matches!(
        barrier.signal_and_wait(),
        Err(SyncError::DisposedObjectUse { .. })
    ));
}

#[test]
fn test_three_workers_two_phases_without_action() {
    let barrier = Arc::new(CyclicBarrier::new(3).unwrap());
    for result in run_participants(&barrier, 3, 2) {
        result.unwrap();
    }
    assert_eq!(barrier.phase_number(), 2);
    assert!(!barrier.is_broken());
}

#[test]
fn test_slow_action_does_not_break_completed_phase() {
    let barrier = Arc::new(
        CyclicBarrier::with_action(2, |_| {
            thread::sleep(Duration::from_millis(150));
            Ok(())
        })
        .unwrap(),
    );

    // Its deadline passes while the action runs, after the phase was already complete
    let impatient = {
        let barrier = barrier.clone();
        thread::spawn(move || barrier.signal_and_wait_timeout(Duration::from_millis(60)))
    };
    while barrier.participants_remaining() != 1 && !impatient.is_finished() {
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(10));

    barrier.signal_and_wait().unwrap();
    assert!(impatient.join().unwrap().unwrap());
    assert!(!barrier.is_broken());
    assert_eq!(barrier.phase_number(), 1);

    for result in run_participants(&barrier, 2, 1) {
        result.unwrap();
    }
    assert_eq!(barrier.phase_number(), 2);
}

#[test]
fn test_participant_added_while_phase_forming() {
    let barrier = Arc::new(CyclicBarrier::new(2).unwrap());
    let first = {
        let barrier = barrier.clone();
        thread::spawn(move || barrier.signal_and_wait())
    };
    while barrier.participants_remaining() != 1 {
        thread::yield_now();
    }

    // The new count applies to the phase already forming
    assert_eq!(barrier.add_participant().unwrap(), 0);
    assert_eq!(barrier.participants_remaining(), 2);

    let second = {
        let barrier = barrier.clone();
        thread::spawn(move || barrier.signal_and_wait())
    };
    while barrier.participants_remaining() != 1 {
        thread::yield_now();
    }
    thread::sleep(Duration::from_millis(10));
    assert!(!first.is_finished());
    assert!(!second.is_finished());
    assert_eq!(barrier.phase_number(), 0);

    barrier.signal_and_wait().unwrap();
    first.join().unwrap().unwrap();
    second.join().unwrap().unwrap();
    assert_eq!(barrier.phase_number(), 1);
    assert_eq!(barrier.participant_count(), 3);
}
