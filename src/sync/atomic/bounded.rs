/*!
 * Bounded Counter
 * CAS counter confined to the inclusive range [0, max]
 */

use super::cell::AtomicCell;
use crate::core::{SyncError, SyncResult};
use std::fmt;

/// Counter whose value never leaves [0, max]
///
/// Every successful change is exactly one CAS success; failed attempts never write.
pub struct BoundedCounter {
    value: AtomicCell<usize>,
    max: usize,
}

impl BoundedCounter {
    pub fn new(initial: usize, max: usize) -> SyncResult<Self> {
        if initial > max {
            return Err(SyncError::InvalidArgument {
                primitive: "bounded counter",
                detail: "initial value exceeds maximum",
            });
        }
        Ok(Self {
            value: AtomicCell::new(initial),
            max,
        })
    }

    #[inline]
    pub fn value(&self) -> usize {
        self.value.load()
    }

    #[inline]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Read current; fail without writing if at the maximum; otherwise CAS current -> current+1,
    /// retrying with a fresh read on CAS failure
    #[inline]
    pub fn try_increment(&self) -> bool {
        self.try_add(1).is_ok()
    }

    #[inline]
    pub fn try_decrement(&self) -> bool {
        self.try_sub(1).is_ok()
    }

    /// Add `n` if the result stays within bounds; `Ok(new)` or `Err(current)`
    pub fn try_add(&self, n: usize) -> Result<usize, usize> {
        let max = self.max;
        self.value
            .update(|current| current.checked_add(n).filter(|next| *next <= max))
            .map(|previous| previous + n)
    }

    /// Subtract `n` if the result stays non-negative; `Ok(new)` or `Err(current)`
    pub fn try_sub(&self, n: usize) -> Result<usize, usize> {
        self.value
            .update(|current| current.checked_sub(n))
            .map(|previous| previous - n)
    }
}

impl fmt::Debug for BoundedCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCounter")
            .field("value", &self.value())
            .field("max", &self.max)
            .finish()
    }
}
