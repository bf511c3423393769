/*!
 * Wait Drivers
 *
 * Shared blocking and async wait loops. A primitive describes how to try, enqueue, withdraw and
 * give back through [`Rendezvous`]; the drivers handle deadlines, cancellation and cleanup the same
 * way everywhere.
 */

use super::cancel::{attach, CancelRegistration, CancelToken};
use super::outcome::{WaitOptions, WaitOutcome};
use super::waiter::{Waiter, WaiterState};
use crate::core::{CallerId, SyncResult};
use crate::monitoring::WaitSpan;
use crate::sync::config::SyncConfig;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::trace;

/// Primitive-side half of a wait
pub(crate) trait Rendezvous: Sync {
    /// Name used in logs and errors
    fn primitive(&self) -> &'static str;

    /// Acquire immediately (`true`) or enqueue `waiter` to be claimed later (`false`)
    ///
    /// Both must happen under the primitive's lock so a concurrent release cannot slip between them.
    fn acquire_or_enqueue(&self, waiter: &Arc<Waiter>) -> SyncResult<bool>;

    /// Remove a waiter that timed out or was cancelled
    fn withdraw(&self, waiter: &Waiter);

    /// Return a resource that was handed to a waiter who is no longer listening
    fn restore(&self) {}
}

/// Block the calling thread until acquired, timed out or cancelled
pub(crate) fn block_on<R: Rendezvous + ?Sized>(
    target: &R,
    caller: CallerId,
    options: &WaitOptions,
    config: &SyncConfig,
) -> SyncResult<WaitOutcome> {
    if options.is_cancelled() {
        return Ok(WaitOutcome::Cancelled);
    }

    let waiter = Waiter::new(caller, options.deadline());
    if target.acquire_or_enqueue(&waiter)? {
        return Ok(WaitOutcome::Acquired);
    }

    let mut span = WaitSpan::new(target.primitive(), caller, waiter.id());
    let registration = attach(options.cancel.as_ref(), &waiter);
    let state = waiter.park(config);
    drop(registration);

    let outcome = settle(target, &waiter, state)?;
    span.record_outcome(outcome);
    Ok(outcome)
}

fn settle<R: Rendezvous + ?Sized>(
    target: &R,
    waiter: &Waiter,
    state: WaiterState,
) -> SyncResult<WaitOutcome> {
    let outcome = state.outcome();
    if !outcome.is_acquired() {
        target.withdraw(waiter);
        trace!(
            primitive = target.primitive(),
            caller = %waiter.caller(),
            ?outcome,
            "Wait ended without acquiring"
        );
    }
    Ok(outcome)
}

/// Suspend until acquired, timed out or cancelled
///
/// The timeout is driven by the tokio timer, so this must run inside a tokio runtime with the time
/// driver enabled when `options.timeout` is set.
pub(crate) async fn wait_async<R: Rendezvous + ?Sized>(
    target: &R,
    options: WaitOptions,
) -> SyncResult<WaitOutcome> {
    let future = WaitFuture::new(target, options.cancel);
    match options.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, future).await {
            Ok(result) => result,
            // The inner future was dropped, which withdrew or gave back its claim
            Err(_) => Ok(WaitOutcome::TimedOut),
        },
        None => future.await,
    }
}

/// Future driving one async wait
pub(crate) struct WaitFuture<'a, R: Rendezvous + ?Sized> {
    target: &'a R,
    cancel: Option<CancelToken>,
    waiter: Option<Arc<Waiter>>,
    registration: Option<CancelRegistration>,
    finished: bool,
}

impl<'a, R: Rendezvous + ?Sized> WaitFuture<'a, R> {
    pub(crate) fn new(target: &'a R, cancel: Option<CancelToken>) -> Self {
        Self {
            target,
            cancel,
            waiter: None,
            registration: None,
            finished: false,
        }
    }

    fn finish(&mut self, result: SyncResult<WaitOutcome>) -> Poll<SyncResult<WaitOutcome>> {
        self.finished = true;
        self.registration = None;
        Poll::Ready(result)
    }
}

impl<R: Rendezvous + ?Sized> Future for WaitFuture<'_, R> {
    type Output = SyncResult<WaitOutcome>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(Ok(WaitOutcome::Acquired));
        }

        let waiter = match &this.waiter {
            Some(waiter) => Arc::clone(waiter),
            None => {
                if this.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                    return this.finish(Ok(WaitOutcome::Cancelled));
                }

                let waiter = Waiter::new(CallerId::current(), None);
                match this.target.acquire_or_enqueue(&waiter) {
                    Ok(true) => return this.finish(Ok(WaitOutcome::Acquired)),
                    Ok(false) => {}
                    Err(e) => return this.finish(Err(e)),
                }

                this.registration = attach(this.cancel.as_ref(), &waiter);
                this.waiter = Some(Arc::clone(&waiter));
                waiter
            }
        };

        match waiter.poll_settled(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(state) => {
                let result = settle(this.target, &waiter, state);
                this.finish(result)
            }
        }
    }
}

impl<R: Rendezvous + ?Sized> Drop for WaitFuture<'_, R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(waiter) = self.waiter.take() else {
            return;
        };

        match waiter.abandon() {
            WaiterState::Notified => {
                trace!(
                    primitive = self.target.primitive(),
                    "Returning resource handed to a dropped wait"
                );
                self.target.restore();
            }
            _ => self.target.withdraw(&waiter),
        }
    }
}
