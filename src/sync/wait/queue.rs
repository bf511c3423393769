/*!
 * Wait Queue
 *
 * FIFO list of blocked callers owned by a primitive's internal state. Not synchronized on its own:
 * every primitive keeps its queue behind the same lock as the bookkeeping the queue protects, so
 * "check state, then enqueue" and "release, then hand off" are atomic with respect to each other.
 *
 * Entries whose waiter already timed out or was cancelled are pruned lazily.
 */

use super::waiter::{Waiter, WaiterState};
use crate::core::CallerId;
use std::collections::VecDeque;
use std::sync::Arc;

struct Entry<T> {
    waiter: Arc<Waiter>,
    tag: T,
}

/// Ordered set of waiters, each carrying a primitive-specific tag
pub(crate) struct WaitQueue<T = ()> {
    entries: VecDeque<Entry<T>>,
}

impl<T> WaitQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, waiter: Arc<Waiter>, tag: T) {
        self.entries.push_back(Entry { waiter, tag });
    }

    /// Remove a specific waiter (timed out, cancelled or satisfied elsewhere)
    pub(crate) fn remove(&mut self, waiter_id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.waiter.id() != waiter_id);
        self.entries.len() != before
    }

    /// True if at least one waiter is still waiting
    pub(crate) fn has_waiters(&mut self) -> bool {
        self.prune_front();
        !self.entries.is_empty()
    }

    /// Number of live waiters whose tag satisfies `filter`
    pub(crate) fn count_where(&self, mut filter: impl FnMut(&T) -> bool) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.waiter.state() == WaiterState::Waiting && filter(&entry.tag))
            .count()
    }

    /// Claim the first live waiter if its tag satisfies `grantable`
    ///
    /// Stops at the first live waiter that is not grantable, preserving FIFO order.
    pub(crate) fn claim_front_if(
        &mut self,
        mut grantable: impl FnMut(&T) -> bool,
    ) -> Option<Claimed<T>> {
        loop {
            let entry = self.entries.front()?;
            if entry.waiter.state() == WaiterState::Waiting && !grantable(&entry.tag) {
                return None;
            }
            let entry = self.entries.pop_front()?;
            if entry.waiter.try_claim() {
                return Some(Claimed::new(entry.waiter, entry.tag));
            }
        }
    }

    /// Claim the first live waiter
    #[inline]
    pub(crate) fn claim_front(&mut self) -> Option<Claimed<T>> {
        self.claim_front_if(|_| true)
    }

    /// Claim every live waiter, emptying the queue
    pub(crate) fn claim_all(&mut self) -> Vec<Claimed<T>> {
        self.entries
            .drain(..)
            .filter(|entry| entry.waiter.try_claim())
            .map(|entry| Claimed::new(entry.waiter, entry.tag))
            .collect()
    }

    fn prune_front(&mut self) {
        while let Some(entry) = self.entries.front() {
            if entry.waiter.state() == WaiterState::Waiting {
                break;
            }
            self.entries.pop_front();
        }
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A waiter whose completion right has been taken
///
/// The holder updates the primitive's state on the waiter's behalf (owner, permit, phase result)
/// and then drops the claim, which marks the waiter notified and wakes it. Dropping outside the
/// primitive's lock keeps the woken thread from immediately contending on it.
pub(crate) struct Claimed<T = ()> {
    waiter: Arc<Waiter>,
    tag: T,
    payload: usize,
}

impl<T> Claimed<T> {
    fn new(waiter: Arc<Waiter>, tag: T) -> Self {
        Self {
            waiter,
            tag,
            payload: 0,
        }
    }

    /// Claim a waiter that is not (or not only) stored in a queue
    pub(crate) fn try_from_waiter(waiter: &Arc<Waiter>, tag: T) -> Option<Self> {
        waiter
            .try_claim()
            .then(|| Self::new(Arc::clone(waiter), tag))
    }

    #[inline]
    pub(crate) fn caller(&self) -> CallerId {
        self.waiter.caller()
    }

    #[inline]
    pub(crate) fn tag(&self) -> &T {
        &self.tag
    }

    pub(crate) fn set_payload(&mut self, payload: usize) {
        self.payload = payload;
    }

    /// Complete the wait now
    #[inline]
    pub(crate) fn grant(self) {
        drop(self);
    }
}

impl<T> Drop for Claimed<T> {
    fn drop(&mut self) {
        self.waiter.complete(self.payload);
    }
}
