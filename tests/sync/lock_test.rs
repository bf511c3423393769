/*!
 * Lock tests: reentrant mutex, spin lock, reader-writer lock, monitor
 */

use std::collections::VecDeque;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use sync_primitives::sync::{
    Monitor, ReaderWriterLock, RecursionPolicy, ReentrantMutex, SpinLock,
};
use sync_primitives::SyncError;

#[test]
fn test_mutex_recursion_blocks_others() {
    let mutex = Arc::new(ReentrantMutex::new());
    for _ in 0..3 {
        mutex.acquire().unwrap();
    }
    assert_eq!(mutex.recursion_depth(), 3);

    let contender = {
        let mutex = mutex.clone();
        thread::spawn(move || mutex.try_acquire(Duration::from_millis(1)).unwrap())
    };
    assert!(!contender.join().unwrap());

    for _ in 0..3 {
        mutex.release().unwrap();
    }
    assert!(!mutex.is_locked());

    let contender = {
        let mutex = mutex.clone();
        thread::spawn(move || {
            let acquired = mutex.try_acquire(Duration::from_millis(100)).unwrap();
            mutex.release().unwrap();
            acquired
        })
    };
    assert!(contender.join().unwrap());
}

#[test]
fn test_mutex_release_by_stranger_rejected() {
    let mutex = Arc::new(ReentrantMutex::new());
    mutex.acquire().unwrap();

    let stranger = {
        let mutex = mutex.clone();
        thread::spawn(move || mutex.release())
    };
    assert!(matches!(
        stranger.join().unwrap(),
        Err(SyncError::OwnershipViolation { .. })
    ));
    assert!(mutex.is_held_by_current());
    mutex.release().unwrap();
}

#[test]
fn test_spin_lock_counts_exactly() {
    let lock = Arc::new(SpinLock::new());
    let counter = Arc::new(AtomicIsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock = lock.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..1_000 {
                    let _guard = lock.lock().unwrap();
                    // Non-atomic read-modify-write made safe by the lock
                    let value = counter.load(Ordering::Relaxed);
                    counter.store(value + 1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 4_000);
    assert!(!lock.is_held());
}

#[test]
fn test_rwlock_writers_exclusive() {
    // >0: that many readers inside, -1: a writer inside
    let occupancy = Arc::new(AtomicIsize::new(0));
    let lock = Arc::new(ReaderWriterLock::new());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let lock = lock.clone();
        let occupancy = occupancy.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                let _read = lock.read().unwrap();
                let before = occupancy.fetch_add(1, Ordering::SeqCst);
                assert!(before >= 0, "reader entered while a writer held the lock");
                occupancy.fetch_sub(1, Ordering::SeqCst);
            }
        }));
    }
    for _ in 0..2 {
        let lock = lock.clone();
        let occupancy = occupancy.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                let _write = lock.write().unwrap();
                let before = occupancy.swap(-1, Ordering::SeqCst);
                assert_eq!(before, 0, "writer entered while the lock was occupied");
                occupancy.store(0, Ordering::SeqCst);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!lock.is_write_lock_held());
    assert_eq!(lock.current_read_count(), 0);
}

#[test]
fn test_rwlock_upgrade_after_readers_leave() {
    let lock = Arc::new(ReaderWriterLock::new());
    let upgradeable = lock.upgradeable_read().unwrap();

    let reader = {
        let lock = lock.clone();
        thread::spawn(move || {
            lock.enter_read().unwrap();
            thread::sleep(Duration::from_millis(20));
            lock.exit_read().unwrap();
        })
    };
    while lock.current_read_count() == 0 && !reader.is_finished() {
        thread::yield_now();
    }

    let start = Instant::now();
    let write = upgradeable.upgrade().unwrap();
    assert!(lock.is_write_lock_held());
    assert_eq!(lock.current_read_count(), 0);
    drop(write);
    drop(upgradeable);
    reader.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!lock.is_upgradeable_read_lock_held());
}

#[test]
fn test_rwlock_recursion_policy() {
    let strict = ReaderWriterLock::new();
    strict.enter_read().unwrap();
    assert!(matches!(
        strict.enter_read(),
        Err(SyncError::ReentrancyViolation { .. })
    ));
    strict.exit_read().unwrap();

    let recursive = ReaderWriterLock::with_policy(RecursionPolicy::SupportsRecursion);
    recursive.enter_write().unwrap();
    recursive.enter_write().unwrap();
    recursive.enter_read().unwrap();
    assert_eq!(recursive.recursive_write_count(), 2);
    recursive.exit_read().unwrap();
    recursive.exit_write().unwrap();
    recursive.exit_write().unwrap();
    assert!(!recursive.is_write_lock_held());
}

#[test]
fn test_monitor_bounded_queue() {
    let monitor = Arc::new(Monitor::new(VecDeque::new()));

    let producer = {
        let monitor = monitor.clone();
        thread::spawn(move || {
            for item in 0..50u32 {
                let mut queue = monitor.enter().unwrap();
                while queue.len() >= 4 {
                    queue.wait().unwrap();
                }
                queue.push_back(item);
                queue.pulse_all();
            }
        })
    };

    let mut received = Vec::new();
    while received.len() < 50 {
        let mut queue = monitor.enter().unwrap();
        while queue.is_empty() {
            queue.wait().unwrap();
        }
        received.extend(queue.drain(..));
        queue.pulse_all();
    }

    producer.join().unwrap();
    assert_eq!(received, (0..50).collect::<Vec<_>>());
}
