//! Port for callers waiting on a coalesced image request.

use crate::domain::errors::LoadFailure;

/// Receives the outcome of a fetch or decode the caller was queued on.
///
/// Exactly one of the two callbacks fires per registration, unless the
/// registration is cancelled first, in which case neither does. Callbacks run
/// on whichever thread reports completion, with no coordinator lock held.
pub trait ImageWaiter<P>: Send + Sync {
    /// Called with the decoded payload.
    fn on_available(&self, payload: P);

    /// Called when the fetch or decode the waiter was queued on failed.
    fn on_failure(&self, reason: LoadFailure);
}

/// Waiter that ignores both outcomes. Used for precache requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWaiter;

impl<P> ImageWaiter<P> for NoopWaiter {
    fn on_available(&self, _payload: P) {}

    fn on_failure(&self, _reason: LoadFailure) {}
}
