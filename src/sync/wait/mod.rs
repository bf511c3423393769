/*!
 * Wait/Notify Primitives
 *
 * The blocking layer every higher-level primitive is built on:
 * - `Waiter`: one blocked caller, parked via `parking_lot_core` or woken through a `Waker`
 * - `WaitQueue`: FIFO of waiters kept under the owning primitive's lock
 * - `CancelToken` / `WaitOptions` / `WaitOutcome`: deadline and cancellation contract
 * - `Backoff`: bounded exponential spin for CAS loops
 *
 * # Architecture
 *
 * Releasing threads *claim* a waiter, update the primitive on its behalf and then complete it.
 * Timeout and cancellation race against the claim through a single CAS, so an expired waiter never
 * holds anything and a granted waiter never reports a timeout.
 */

mod cancel;
mod driver;
mod outcome;
mod queue;
mod spinwait;
mod waiter;

// Re-export public API
pub use cancel::CancelToken;
pub use outcome::{WaitOptions, WaitOutcome};
pub use spinwait::Backoff;

pub(crate) use cancel::attach;
pub(crate) use driver::{block_on, wait_async, Rendezvous};
pub(crate) use queue::{Claimed, WaitQueue};
pub(crate) use waiter::{Waiter, WaiterState};
