/*!
 * Error Types
 * Centralized error handling with thiserror and miette diagnostics
 */

use miette::Diagnostic;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for every fallible primitive operation
pub type SyncResult<T> = Result<T, SyncError>;

/// Boxed error returned by a barrier post-phase action
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Synchronization errors
///
/// Resource-bound violations (ownership, reentrancy, disposal, count bounds) fail fast and leave the
/// primitive untouched. Timeouts and cancellation are normally reported through
/// [`WaitOutcome`](crate::sync::WaitOutcome); the `ContentionTimeout` and `Cancelled` variants only
/// appear when a caller asks for them to be propagated as errors.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum SyncError {
    #[error("Timed out waiting for {primitive}")]
    #[diagnostic(
        code(sync::contention_timeout),
        help("The resource stayed unavailable for the whole timeout. Retry or back off.")
    )]
    ContentionTimeout { primitive: &'static str },

    #[error("Wait on {primitive} was cancelled")]
    #[diagnostic(
        code(sync::cancelled),
        help("The cancellation token passed to the wait was triggered.")
    )]
    Cancelled { primitive: &'static str },

    #[error("{primitive} released by a caller that does not hold it")]
    #[diagnostic(
        code(sync::ownership_violation),
        help("Only the current holder may release. Check acquire/release pairing.")
    )]
    OwnershipViolation { primitive: &'static str },

    #[error("Illegal nested acquisition of {primitive}: {detail}")]
    #[diagnostic(
        code(sync::reentrancy_violation),
        help("Release the held mode first, use the upgradeable path, or opt into recursion.")
    )]
    ReentrancyViolation {
        primitive: &'static str,
        detail: &'static str,
    },

    #[error("Count underflow on {primitive}: requested {requested}, remaining {remaining}")]
    #[diagnostic(
        code(sync::count_underflow),
        help("More signals than outstanding count. State was left unchanged.")
    )]
    CountUnderflow {
        primitive: &'static str,
        requested: usize,
        remaining: usize,
    },

    #[error("Count overflow on {primitive}: adding {requested} to {current} exceeds {max}")]
    #[diagnostic(
        code(sync::count_overflow),
        help("More releases than acquisitions. State was left unchanged.")
    )]
    CountOverflow {
        primitive: &'static str,
        requested: usize,
        current: usize,
        max: usize,
    },

    #[error("Invalid state for {primitive}: {detail}")]
    #[diagnostic(
        code(sync::invalid_state),
        help("The operation is not legal in the primitive's current state.")
    )]
    InvalidState {
        primitive: &'static str,
        detail: &'static str,
    },

    #[error("Invalid argument for {primitive}: {detail}")]
    #[diagnostic(code(sync::invalid_argument))]
    InvalidArgument {
        primitive: &'static str,
        detail: &'static str,
    },

    #[error("Barrier broken during phase {phase}")]
    #[diagnostic(
        code(sync::broken_barrier),
        help("A participant timed out or was cancelled. Call reset() before reusing the barrier.")
    )]
    BrokenBarrier { phase: u64 },

    #[error("Post-phase action failed in phase {phase}: {source}")]
    #[diagnostic(
        code(sync::post_phase_action),
        help("The barrier still advanced to the next phase.")
    )]
    PostPhaseActionFailure {
        phase: u64,
        #[source]
        source: PhaseActionError,
    },

    #[error("{primitive} has been disposed")]
    #[diagnostic(code(sync::disposed))]
    DisposedObjectUse { primitive: &'static str },

    #[error("Cannot dispose {primitive}: {detail}")]
    #[diagnostic(
        code(sync::dispose_in_use),
        help("Release every hold and let all waiters finish before disposing.")
    )]
    DisposeWhileInUse {
        primitive: &'static str,
        detail: &'static str,
    },
}

impl SyncError {
    /// True for timeout and cancellation, the recoverable outcomes
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ContentionTimeout { .. } | Self::Cancelled { .. })
    }
}

/// Shared failure of a post-phase action
///
/// Cheap to clone so that every waiter of the phase observes the same underlying error.
#[derive(Clone)]
pub struct PhaseActionError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl PhaseActionError {
    pub fn new(error: BoxError) -> Self {
        Self(Arc::from(error))
    }

    /// Convert a panic payload caught while running the action
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "post-phase action panicked".to_string()
        };
        Self(Arc::new(ActionPanic(message)))
    }

    /// Underlying error
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for PhaseActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PhaseActionError").field(&self.0.to_string()).finish()
    }
}

impl fmt::Display for PhaseActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for PhaseActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug, Error)]
#[error("post-phase action panicked: {0}")]
struct ActionPanic(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_message() {
        let err = PhaseActionError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "post-phase action panicked: boom");

        let err = PhaseActionError::from_panic(Box::new(String::from("owned")));
        assert!(err.to_string().contains("owned"));

        let err = PhaseActionError::from_panic(Box::new(42u8));
        assert!(err.to_string().contains("panicked"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(SyncError::ContentionTimeout { primitive: "mutex" }.is_recoverable());
        assert!(SyncError::Cancelled { primitive: "event" }.is_recoverable());
        assert!(!SyncError::OwnershipViolation { primitive: "mutex" }.is_recoverable());
    }

    #[test]
    fn test_post_phase_failure_source_chain() {
        let action = PhaseActionError::new("disk full".into());
        let err = SyncError::PostPhaseActionFailure {
            phase: 3,
            source: action,
        };
        assert_eq!(
            err.to_string(),
            "Post-phase action failed in phase 3: disk full"
        );
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk full"));
    }
}
