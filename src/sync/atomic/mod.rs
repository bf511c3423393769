/*!
 * Atomic Primitives
 * Lock-free cells that every blocking primitive builds its fast path on
 */

mod bounded;
mod cell;
mod versioned;

pub use bounded::BoundedCounter;
pub use cell::{AtomicCell, AtomicInteger, AtomicValue};
pub use versioned::{Versioned, VersionedCell};
