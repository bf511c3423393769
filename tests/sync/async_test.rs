/*!
 * Async wait tests: timeouts and cancellation must never swallow a permit or signal
 */

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use sync_primitives::sync::{
    CancelToken, CountdownLatch, CountingSemaphore, Event, WaitOptions, WaitOutcome,
};

#[tokio::test]
async fn test_cancelled_acquire_leaves_no_ghost_permit() {
    let semaphore = Arc::new(CountingSemaphore::new(0, 1).unwrap());
    let token = CancelToken::new();

    let task = {
        let semaphore = semaphore.clone();
        let token = token.clone();
        tokio::spawn(async move {
            semaphore
                .acquire_async(WaitOptions::cancellable(token))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();
    assert_eq!(task.await.unwrap().unwrap(), WaitOutcome::Cancelled);
    assert_eq!(semaphore.waiting_count(), 0);

    semaphore.release(1).unwrap();
    assert_eq!(semaphore.current_count(), 1);
}

#[tokio::test]
async fn test_timed_out_acquire_leaves_no_ghost_permit() {
    let semaphore = CountingSemaphore::new(0, 1).unwrap();
    let outcome = semaphore
        .acquire_async(WaitOptions::timeout(Duration::from_millis(10)))
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);

    semaphore.release(1).unwrap();
    assert_eq!(semaphore.current_count(), 1);
    assert!(semaphore.try_acquire().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_timeouts_conserve_permits() {
    let semaphore = Arc::new(CountingSemaphore::new(0, 64).unwrap());

    let waits: Vec<_> = (0..32)
        .map(|i| {
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let timeout = Duration::from_millis(5 + (i % 4) * 5);
                semaphore.acquire_async(WaitOptions::timeout(timeout)).await
            })
        })
        .collect();

    for _ in 0..16 {
        semaphore.release(1).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let acquired = join_all(waits)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(WaitOutcome::Acquired))))
        .count();

    // Every released permit is either held by a winner or back in the count
    assert_eq!(acquired + semaphore.current_count(), 16);
    assert_eq!(semaphore.waiting_count(), 0);
}

#[tokio::test]
async fn test_event_and_latch_async_waits() {
    let event = Arc::new(Event::auto(false));
    let task = {
        let event = event.clone();
        tokio::spawn(async move { event.wait_async(WaitOptions::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    event.set().unwrap();
    assert_eq!(task.await.unwrap().unwrap(), WaitOutcome::Acquired);
    assert!(!event.is_set());

    let latch = CountdownLatch::new(1);
    let outcome = latch
        .wait_async(WaitOptions::timeout(Duration::from_millis(5)))
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);
    latch.signal().unwrap();
    assert_eq!(
        latch.wait_async(WaitOptions::new()).await.unwrap(),
        WaitOutcome::Acquired
    );
}
