/*!
 * Wait strategy configuration tests
 */

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use sync_primitives::init_tracing;
use sync_primitives::sync::{
    CountingSemaphore, Event, ReentrantMutex, ResetMode, StrategyType, SyncConfig,
};

fn strategies() -> Vec<SyncConfig> {
    vec![
        SyncConfig::long_wait(),
        SyncConfig::low_latency(),
        SyncConfig {
            strategy: StrategyType::Auto,
            ..Default::default()
        },
    ]
}

#[test]
fn test_handoff_under_every_strategy() {
    init_tracing();

    for config in strategies() {
        let mutex = Arc::new(ReentrantMutex::with_config(config.clone()));
        let semaphore = Arc::new(CountingSemaphore::with_config(0, 1, config.clone()).unwrap());

        mutex.acquire().unwrap();
        let worker = {
            let mutex = mutex.clone();
            let semaphore = semaphore.clone();
            thread::spawn(move || {
                semaphore.acquire().unwrap();
                mutex.acquire().unwrap();
                mutex.release().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(5));
        semaphore.release(1).unwrap();
        thread::sleep(Duration::from_millis(5));
        mutex.release().unwrap();
        worker.join().unwrap();

        assert!(!mutex.is_locked(), "{:?}", config.strategy);
        assert_eq!(semaphore.current_count(), 0);
    }
}

#[test]
fn test_timeouts_honoured_under_every_strategy() {
    for config in strategies() {
        let event = Event::with_config(ResetMode::Manual, false, config.clone());
        let start = Instant::now();
        assert!(!event.wait_timeout(Duration::from_millis(20)).unwrap());
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_millis(20),
            "{:?} returned after {waited:?}",
            config.strategy
        );
    }
}

#[test]
fn test_from_env_defaults() {
    let config = SyncConfig::from_env();
    assert!(config.backoff_limit <= 16);
    assert_ne!(config.select_strategy(), StrategyType::Auto);
}
