/*!
 * Signaling Primitives
 *
 * Coordination without ownership:
 * - `Event`: manual or auto-reset signal, with multi-event `wait_any`
 * - `CountdownLatch`: gate that opens when a count drains to zero
 * - `CyclicBarrier`: repeatable phase rendezvous with a post-phase action
 */

mod barrier;
mod event;
mod latch;

pub use barrier::{CyclicBarrier, PhaseContext};
pub use event::{AnyOutcome, Event, ResetMode};
pub use latch::CountdownLatch;
