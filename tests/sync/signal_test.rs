/*!
 * Event and countdown latch tests
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use sync_primitives::sync::{AnyOutcome, CountdownLatch, Event, ResetMode, WaitOptions};
use sync_primitives::SyncError;

#[test]
fn test_auto_reset_latches_single_signal() {
    let event = Event::new(ResetMode::Auto, false);
    event.set().unwrap();
    event.set().unwrap();

    // Two sets with nobody waiting still release only one waiter
    assert!(event.wait_timeout(Duration::ZERO).unwrap());
    assert!(!event.wait_timeout(Duration::from_millis(10)).unwrap());
    assert!(!event.is_set());
}

#[test]
fn test_auto_reset_releases_one_per_set() {
    let event = Arc::new(Event::auto(false));
    let passed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let event = event.clone();
            let passed = passed.clone();
            thread::spawn(move || {
                if event.wait_timeout(Duration::from_millis(300)).unwrap() {
                    passed.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    event.set().unwrap();
    event.set().unwrap();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(passed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_manual_reset_releases_everyone() {
    let event = Arc::new(Event::manual(false));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let event = event.clone();
            thread::spawn(move || event.wait())
        })
        .collect();

    thread::sleep(Duration::from_millis(10));
    event.set().unwrap();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert!(event.is_set());
    event.reset().unwrap();
    assert!(!event.wait_timeout(Duration::ZERO).unwrap());
}

#[test]
fn test_wait_any_reports_index() {
    let first = Event::auto(false);
    let second = Arc::new(Event::auto(false));

    let setter = {
        let second = second.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            second.set()
        })
    };

    let outcome = Event::wait_any(
        &[&first, second.as_ref()],
        &WaitOptions::timeout(Duration::from_secs(5)),
    )
    .unwrap();
    setter.join().unwrap().unwrap();

    assert_eq!(outcome, AnyOutcome::Signaled(1));
    // The auto-reset signal was consumed by wait_any
    assert!(!second.is_set());
    assert_eq!(
        Event::wait_any(&[&first, second.as_ref()], &WaitOptions::timeout(Duration::ZERO)).unwrap(),
        AnyOutcome::TimedOut
    );
}

#[test]
fn test_latch_reset_round_trip() {
    let latch = Arc::new(CountdownLatch::new(2));
    let waiter = {
        let latch = latch.clone();
        thread::spawn(move || latch.wait())
    };

    assert!(!latch.signal().unwrap());
    assert!(latch.signal().unwrap());
    waiter.join().unwrap().unwrap();

    assert!(matches!(
        latch.add_count(),
        Err(SyncError::InvalidState { .. })
    ));

    latch.reset(1).unwrap();
    assert_eq!(latch.current_count(), 1);
    assert!(!latch.wait_timeout(Duration::from_millis(5)).unwrap());
    latch.add_count().unwrap();
    latch.signal_n(2).unwrap();
    assert!(latch.wait_timeout(Duration::ZERO).unwrap());
}

#[test]
fn test_latch_counts_workers() {
    let latch = Arc::new(CountdownLatch::new(8));
    for _ in 0..8 {
        let latch = latch.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(2));
            latch.signal().unwrap();
        });
    }
    assert!(latch.wait_timeout(Duration::from_secs(5)).unwrap());
    assert_eq!(latch.current_count(), 0);
}
