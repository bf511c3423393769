/*!
 * Locks
 *
 * Mutual exclusion primitives:
 * - `SpinLock`: busy-wait, non-reentrant, for sub-microsecond critical sections
 * - `ReentrantMutex`: blocking, reentrant, FIFO hand-off
 * - `ReaderWriterLock`: shared/exclusive with an upgradeable-read slot
 * - `Monitor<T>`: lock handle owning its data, with condition wait/pulse
 */

mod monitor;
mod mutex;
mod rwlock;
mod spin;

pub use monitor::{Monitor, MonitorGuard};
pub use mutex::{MutexGuard, ReentrantMutex};
pub use rwlock::{
    ReadGuard, ReaderWriterLock, RecursionPolicy, UpgradeableReadGuard, WriteGuard,
};
pub use spin::{SpinGuard, SpinLock};
