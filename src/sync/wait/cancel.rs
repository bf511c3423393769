/*!
 * Cancellation Token
 *
 * Explicit cancellation signal threaded through suspendable calls. Cancelling wakes every waiter
 * currently registered with the token; each waiter then removes itself from its primitive's queue
 * without consuming anything.
 */

use super::waiter::Waiter;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Cloneable cancellation signal
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    waiters: Mutex<Vec<(u64, Weak<Waiter>)>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Trigger cancellation; idempotent
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        let waiters = std::mem::take(&mut *self.inner.waiters.lock());
        trace!(waiters = waiters.len(), "Cancellation token triggered");
        for (_, waiter) in waiters {
            if let Some(waiter) = waiter.upgrade() {
                waiter.cancel();
            }
        }
    }

    /// Attach a waiter; `None` if the token is already cancelled
    pub(crate) fn register(&self, waiter: &Arc<Waiter>) -> Option<CancelRegistration> {
        let mut waiters = self.inner.waiters.lock();
        // Checked under the list lock: cancel() sets the flag before draining the list
        if self.is_cancelled() {
            return None;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        waiters.push((id, Arc::downgrade(waiter)));
        Some(CancelRegistration {
            token: self.clone(),
            id,
        })
    }

    fn unregister(&self, id: u64) {
        self.inner.waiters.lock().retain(|(entry, _)| *entry != id);
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Keeps a waiter attached to a token; detaches on drop
pub(crate) struct CancelRegistration {
    token: CancelToken,
    id: u64,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        self.token.unregister(self.id);
    }
}

/// Register `waiter` with an optional token, cancelling it right away if the token already fired
pub(crate) fn attach(token: Option<&CancelToken>, waiter: &Arc<Waiter>) -> Option<CancelRegistration> {
    let token = token?;
    let registration = token.register(waiter);
    if registration.is_none() {
        waiter.cancel();
    }
    registration
}
