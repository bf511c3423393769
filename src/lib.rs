/*!
 * Sync Primitives Library
 * Thread-safe coordination primitives with FIFO hand-off, deadlines and cancellation
 *
 * Errors are [`SyncError`] values with miette diagnostics; waits report [`sync::WaitOutcome`].
 * Logging goes through `tracing`; call [`monitoring::init_tracing`] to install a subscriber.
 */

pub mod core;
pub mod monitoring;
pub mod sync;

// Re-exports
pub use crate::core::{BoxError, CallerId, CallerScope, PhaseActionError, SyncError, SyncResult};
pub use crate::monitoring::init_tracing;
pub use crate::sync::{
    AtomicCell, CancelToken, CountdownLatch, CountingSemaphore, CyclicBarrier, Event, Monitor,
    ReaderWriterLock, ReentrantMutex, ResetMode, SpinLock, SyncConfig, WaitOptions, WaitOutcome,
};
