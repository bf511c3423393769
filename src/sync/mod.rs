/*!
 * Synchronization Primitives
 *
 * Thread and task coordination built on a shared wait layer:
 * - `atomic`: typed CAS cells, bounded counters, ABA-safe versioned cells
 * - `locks`: spin lock, reentrant mutex, reader-writer lock, monitor
 * - `semaphore`: counting semaphore with blocking and async acquisition
 * - `signal`: events, countdown latch, cyclic barrier
 * - `named`: process-local registry for opening primitives by name
 *
 * Every blocking operation accepts [`WaitOptions`] (deadline and cancellation) and reports a
 * [`WaitOutcome`]. Release paths hand resources directly to the oldest eligible waiter.
 *
 * # Examples
 *
 * ```
 * use sync_primitives::sync::{CancelToken, CountingSemaphore, WaitOptions, WaitOutcome};
 * use std::time::Duration;
 *
 * let semaphore = CountingSemaphore::new(0, 1).unwrap();
 * let token = CancelToken::new();
 * token.cancel();
 *
 * let options = WaitOptions::timeout(Duration::from_millis(5)).with_cancel(token);
 * assert_eq!(semaphore.acquire_with(&options).unwrap(), WaitOutcome::Cancelled);
 * ```
 */

pub mod atomic;
mod config;
pub mod locks;
mod named;
mod semaphore;
pub mod signal;
mod wait;

// Re-export public API
pub use atomic::{
    AtomicCell, AtomicInteger, AtomicValue, BoundedCounter, Versioned, VersionedCell,
};
pub use config::{StrategyType, SyncConfig};
pub use locks::{
    Monitor, MonitorGuard, MutexGuard, ReadGuard, ReaderWriterLock, RecursionPolicy,
    ReentrantMutex, SpinGuard, SpinLock, UpgradeableReadGuard, WriteGuard,
};
pub use named::{NamedObjectHost, Opened, ProcessNamespace};
pub use semaphore::{CountingSemaphore, SemaphorePermit};
pub use signal::{AnyOutcome, CountdownLatch, CyclicBarrier, Event, PhaseContext, ResetMode};
pub use wait::{Backoff, CancelToken, WaitOptions, WaitOutcome};
