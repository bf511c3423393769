/*!
 * Counting semaphore tests
 */

use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use sync_primitives::sync::{CountingSemaphore, ProcessNamespace};
use sync_primitives::SyncError;

#[test]
fn test_at_most_max_holders() {
    let semaphore = Arc::new(CountingSemaphore::new(3, 3).unwrap());
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let semaphore = semaphore.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            thread::spawn(move || {
                semaphore.acquire().unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                inside.fetch_sub(1, Ordering::SeqCst);
                semaphore.release(1).unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(semaphore.current_count(), 3);
    assert_eq!(semaphore.waiting_count(), 0);
}

#[test]
fn test_release_hands_off_to_waiters_in_order() {
    let semaphore = Arc::new(CountingSemaphore::new(0, 2).unwrap());
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..2 {
        let worker_semaphore = semaphore.clone();
        let order = order.clone();
        handles.push(thread::spawn(move || {
            worker_semaphore.acquire().unwrap();
            order.lock().push(i);
        }));
        while semaphore.waiting_count() != i + 1 {
            thread::yield_now();
        }
    }

    assert_eq!(semaphore.release(2).unwrap(), 0);
    for handle in handles {
        handle.join().unwrap();
    }
    // Both permits went to the waiters, none stayed in the count
    assert_eq!(semaphore.current_count(), 0);
    assert_eq!(order.lock().len(), 2);
}

#[test]
fn test_overflow_leaves_count() {
    let semaphore = CountingSemaphore::new(2, 3).unwrap();
    let err = semaphore.release(2).unwrap_err();
    assert!(matches!(
        err,
        SyncError::CountOverflow {
            requested: 2,
            current: 2,
            max: 3,
            ..
        }
    ));
    assert_eq!(semaphore.current_count(), 2);
}

#[test]
fn test_permit_guard_returns_on_drop() {
    let semaphore = CountingSemaphore::new(1, 1).unwrap();
    {
        let _permit = semaphore.permit().unwrap();
        assert!(semaphore.try_permit().unwrap().is_none());
    }
    assert_eq!(semaphore.current_count(), 1);
}

#[test]
fn test_named_semaphore_shared() {
    let name = "tests.semaphore.shared";
    let first = CountingSemaphore::open_named(name, 1, 1).unwrap();
    assert!(first.created_new);
    let second = CountingSemaphore::open_named(name, 5, 5).unwrap();
    assert!(!second.created_new);

    assert!(second.handle.try_acquire().unwrap());
    assert!(!first.handle.try_acquire().unwrap());
    assert_eq!(first.handle.max_count(), 1);
    assert!(ProcessNamespace::global().contains(name));
}
