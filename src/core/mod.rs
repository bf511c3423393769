/*!
 * Core Module
 * Error taxonomy and caller identity shared by every primitive
 */

pub mod errors;
pub mod id;

// Re-export for convenience
pub use errors::{BoxError, PhaseActionError, SyncError, SyncResult};
pub use id::{CallerId, CallerScope};
