/*!
 * Wait Outcomes and Options
 */

use super::cancel::CancelToken;
use crate::core::{SyncError, SyncResult};
use std::time::{Duration, Instant};

/// Result of a wait that may expire or be cancelled
#[must_use = "a timed-out or cancelled wait did not acquire anything"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Acquired,
    TimedOut,
    Cancelled,
}

impl WaitOutcome {
    #[inline]
    pub fn is_acquired(self) -> bool {
        matches!(self, Self::Acquired)
    }

    /// Turn a timeout or cancellation into an error for callers that want propagation
    pub fn into_result(self, primitive: &'static str) -> SyncResult<()> {
        match self {
            Self::Acquired => Ok(()),
            Self::TimedOut => Err(SyncError::ContentionTimeout { primitive }),
            Self::Cancelled => Err(SyncError::Cancelled { primitive }),
        }
    }
}

/// Optional deadline and cancellation signal for a suspendable operation
///
/// # Examples
///
/// ```
/// use sync_primitives::sync::{CancelToken, WaitOptions};
/// use std::time::Duration;
///
/// let token = CancelToken::new();
/// let options = WaitOptions::timeout(Duration::from_millis(250)).with_cancel(token.clone());
/// assert!(options.deadline().is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl WaitOptions {
    /// Wait forever, no cancellation
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    pub fn cancellable(token: CancelToken) -> Self {
        Self {
            timeout: None,
            cancel: Some(token),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Absolute deadline; durations too large to represent mean "no deadline"
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.and_then(|t| Instant::now().checked_add(t))
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result_mapping() {
        assert!(WaitOutcome::Acquired.into_result("mutex").is_ok());
        assert!(matches!(
            WaitOutcome::TimedOut.into_result("mutex"),
            Err(SyncError::ContentionTimeout { primitive: "mutex" })
        ));
        assert!(matches!(
            WaitOutcome::Cancelled.into_result("event"),
            Err(SyncError::Cancelled { primitive: "event" })
        ));
    }

    #[test]
    fn test_huge_timeout_has_no_deadline() {
        assert!(WaitOptions::timeout(Duration::MAX).deadline().is_none());
        assert!(WaitOptions::new().deadline().is_none());
    }

    #[test]
    fn test_cancel_flag_visible() {
        let token = CancelToken::new();
        let options = WaitOptions::cancellable(token.clone());
        assert!(!options.is_cancelled());
        token.cancel();
        assert!(options.is_cancelled());
    }
}
