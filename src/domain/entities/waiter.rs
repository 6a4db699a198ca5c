//! Identity wrapper for registered waiters.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::domain::errors::LoadFailure;
use crate::domain::ports::ImageWaiter;

static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a waiter registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl std::fmt::Display for WaiterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

struct WaiterSlot<P> {
    id: WaiterId,
    delivery: ReentrantMutex<()>,
    waiter: Arc<dyn ImageWaiter<P>>,
}

/// Shared handle to a waiter.
///
/// Equality and hashing use the identity assigned at construction, never the
/// wrapped waiter's value: two handles built from equal waiters are distinct,
/// while clones of one handle compare equal.
pub struct WaiterHandle<P> {
    slot: Arc<WaiterSlot<P>>,
}

impl<P> WaiterHandle<P> {
    /// Wraps a waiter under a fresh identity.
    pub fn new(waiter: Arc<dyn ImageWaiter<P>>) -> Self {
        let id = WaiterId(NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            slot: Arc::new(WaiterSlot {
                id,
                delivery: ReentrantMutex::new(()),
                waiter,
            }),
        }
    }

    /// Returns this handle's identity.
    #[must_use]
    pub fn id(&self) -> WaiterId {
        self.slot.id
    }

    /// Acquires the per-waiter delivery lock.
    ///
    /// Held while checking that the waiter is still queued and delivering its
    /// callback, so a completion for the same waiter is delivered at most once.
    /// Reentrant, so a callback that re-enters the coordinator on the same
    /// waiter does not deadlock.
    pub(crate) fn lock_delivery(&self) -> ReentrantMutexGuard<'_, ()> {
        self.slot.delivery.lock()
    }

    pub(crate) fn notify_available(&self, payload: P) {
        self.slot.waiter.on_available(payload);
    }

    pub(crate) fn notify_failure(&self, reason: LoadFailure) {
        self.slot.waiter.on_failure(reason);
    }
}

impl<P> Clone for WaiterHandle<P> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<P> PartialEq for WaiterHandle<P> {
    fn eq(&self, other: &Self) -> bool {
        self.slot.id == other.slot.id
    }
}

impl<P> Eq for WaiterHandle<P> {}

impl<P> Hash for WaiterHandle<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slot.id.hash(state);
    }
}

impl<P> std::fmt::Debug for WaiterHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WaiterHandle").field(&self.slot.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::NoopWaiter;

    #[test]
    fn test_identity_not_value_equality() {
        let shared: Arc<dyn ImageWaiter<u32>> = Arc::new(NoopWaiter);
        let a = WaiterHandle::new(Arc::clone(&shared));
        let b = WaiterHandle::new(shared);

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_delivery_lock_is_reentrant() {
        let handle = WaiterHandle::<u32>::new(Arc::new(NoopWaiter));
        let _outer = handle.lock_delivery();
        let _inner = handle.lock_delivery();
    }
}
