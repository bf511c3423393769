/*!
 * Caller Identity
 * Explicit identity tokens used for ownership and reentrancy tracking
 */

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CALLER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<Option<CallerId>> = const { Cell::new(None) };
}

/// Identity of a thread or task that holds or waits on a primitive
///
/// Independent of `std::thread::ThreadId`: each thread lazily receives a fresh id the first time it
/// touches a primitive, and a task executor may run code on behalf of another identity with
/// [`CallerId::enter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(NonZeroU64);

impl CallerId {
    /// Allocate a new, never reused identity
    pub fn allocate() -> Self {
        let raw = NEXT_CALLER.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Identity of the calling thread (or the identity entered on it)
    #[inline]
    pub fn current() -> Self {
        CURRENT.with(|slot| match slot.get() {
            Some(id) => id,
            None => {
                let id = Self::allocate();
                slot.set(Some(id));
                id
            }
        })
    }

    /// Act as `self` on this thread until the returned scope is dropped
    pub fn enter(self) -> CallerScope {
        let previous = CURRENT.with(|slot| slot.replace(Some(self)));
        CallerScope {
            previous,
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }

    /// Rebuild from a raw value; zero means "no caller"
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "caller#{}", self.0)
    }
}

/// Restores the previous identity of the thread on drop
#[must_use = "the identity is reverted as soon as the scope is dropped"]
pub struct CallerScope {
    previous: Option<CallerId>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for CallerScope {
    fn drop(&mut self) {
        CURRENT.with(|slot| slot.set(self.previous));
    }
}
