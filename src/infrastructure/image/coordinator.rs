//! Request coalescing for network fetches and decodes.
//!
//! Callers asking for the same resource share one fetch; callers asking for
//! the same rendition share one decode. Completions fan out to every queued
//! waiter in registration order.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{
    DecodeSignature, PixelFormat, ResourceId, ScalingDescriptor, WaiterHandle, WaiterId,
};
use crate::domain::errors::LoadFailure;
use crate::domain::ports::AsyncOperationsObserver;

/// Where a [`RequestCoordinator::try_join`] call left the waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncOperationState {
    /// Joined an in-flight network fetch.
    QueuedForNetwork,
    /// Joined an in-flight decode.
    QueuedForDecode,
    /// Nothing matching is in flight; the caller must register and start work.
    NotQueued,
}

/// Outcome of an explicit registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The registration created the queue entry. The caller owns starting the job.
    Created,
    /// The entry already existed; the job is already running.
    Joined,
}

impl Registration {
    /// Returns true if the caller must start the underlying job.
    #[must_use]
    pub const fn must_start(self) -> bool {
        matches!(self, Self::Created)
    }
}

/// A queued network waiter together with the bounds it asked for. Fetch-only
/// requests carry no bounds and are released once the bytes are stored.
struct NetworkRequest<P> {
    waiter: WaiterHandle<P>,
    scaling: Option<ScalingDescriptor>,
}

/// Identifies one set of waiters taken out of a completed queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchId(u64);

/// The single queue a waiter currently belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Membership {
    Network(ResourceId),
    Decode(DecodeSignature),
    /// Removed from a completed queue, awaiting delivery or hand-off to decode.
    Detached(BatchId),
}

/// A job whose last waiter went away.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OrphanedJob {
    Fetch(ResourceId),
    Decode(DecodeSignature),
}

/// Queue entries keyed by resource and signature, plus the reverse index from
/// waiter to its queue key. Mutated only under the coordinator lock.
///
/// Invariants: a queue key is present iff its sequence is non-empty; a waiter
/// appears in `members` iff it sits in exactly one queue or detached batch.
struct QueueState<P> {
    network: HashMap<ResourceId, VecDeque<NetworkRequest<P>>>,
    decode: HashMap<DecodeSignature, VecDeque<WaiterHandle<P>>>,
    members: HashMap<WaiterId, Membership>,
    next_batch: u64,
}

impl<P> QueueState<P> {
    fn new() -> Self {
        Self {
            network: HashMap::new(),
            decode: HashMap::new(),
            members: HashMap::new(),
            next_batch: 0,
        }
    }

    fn allocate_batch(&mut self) -> BatchId {
        self.next_batch += 1;
        BatchId(self.next_batch)
    }

    fn enqueue_network(
        &mut self,
        waiter: WaiterHandle<P>,
        resource: &ResourceId,
        scaling: Option<ScalingDescriptor>,
    ) -> Registration {
        self.members
            .insert(waiter.id(), Membership::Network(resource.clone()));
        match self.network.get_mut(resource) {
            Some(queue) => {
                queue.push_back(NetworkRequest { waiter, scaling });
                Registration::Joined
            }
            None => {
                let queue = VecDeque::from([NetworkRequest { waiter, scaling }]);
                self.network.insert(resource.clone(), queue);
                Registration::Created
            }
        }
    }

    fn enqueue_decode(
        &mut self,
        waiter: WaiterHandle<P>,
        signature: &DecodeSignature,
    ) -> Registration {
        self.members
            .insert(waiter.id(), Membership::Decode(signature.clone()));
        match self.decode.get_mut(signature) {
            Some(queue) => {
                queue.push_back(waiter);
                Registration::Joined
            }
            None => {
                self.decode
                    .insert(signature.clone(), VecDeque::from([waiter]));
                Registration::Created
            }
        }
    }

    /// Removes `id` from whatever it is queued on. Returns the job to cancel
    /// if that emptied a queue entry.
    fn detach(&mut self, id: WaiterId) -> Option<OrphanedJob> {
        match self.members.remove(&id)? {
            Membership::Network(resource) => {
                let queue = self.network.get_mut(&resource)?;
                queue.retain(|request| request.waiter.id() != id);
                if queue.is_empty() {
                    self.network.remove(&resource);
                    return Some(OrphanedJob::Fetch(resource));
                }
                None
            }
            Membership::Decode(signature) => {
                let queue = self.decode.get_mut(&signature)?;
                queue.retain(|waiter| waiter.id() != id);
                if queue.is_empty() {
                    self.decode.remove(&signature);
                    return Some(OrphanedJob::Decode(signature));
                }
                None
            }
            Membership::Detached(_) => None,
        }
    }

    /// Queues `waiter` on the fetch of `resource`, moving it off any other
    /// queue first. Re-registering on the same fetch only updates its bounds.
    fn register_network(
        &mut self,
        waiter: &WaiterHandle<P>,
        resource: &ResourceId,
        scaling: Option<ScalingDescriptor>,
    ) -> (Registration, Option<OrphanedJob>) {
        let id = waiter.id();
        if matches!(self.members.get(&id), Some(Membership::Network(r)) if r == resource) {
            if let Some(request) = self
                .network
                .get_mut(resource)
                .and_then(|queue| queue.iter_mut().find(|r| r.waiter.id() == id))
            {
                request.scaling = scaling;
            }
            return (Registration::Joined, None);
        }
        let orphan = self.detach(id);
        (self.enqueue_network(waiter.clone(), resource, scaling), orphan)
    }

    /// Queues `waiter` on the decode of `signature`, moving it off any other
    /// queue first.
    fn register_decode(
        &mut self,
        waiter: &WaiterHandle<P>,
        signature: &DecodeSignature,
    ) -> (Registration, Option<OrphanedJob>) {
        let id = waiter.id();
        if matches!(self.members.get(&id), Some(Membership::Decode(s)) if s == signature) {
            return (Registration::Joined, None);
        }
        let orphan = self.detach(id);
        (self.enqueue_decode(waiter.clone(), signature), orphan)
    }

    /// Claims a detached waiter for delivery. False if it was cancelled or
    /// re-registered since the batch was taken.
    fn claim(&mut self, id: WaiterId, batch: BatchId) -> bool {
        if self.members.get(&id) == Some(&Membership::Detached(batch)) {
            self.members.remove(&id);
            true
        } else {
            false
        }
    }

    fn detach_network_queue(
        &mut self,
        resource: &ResourceId,
    ) -> Option<(BatchId, Vec<NetworkRequest<P>>)> {
        let queue = self.network.remove(resource)?;
        let batch = self.allocate_batch();
        for request in &queue {
            self.members
                .insert(request.waiter.id(), Membership::Detached(batch));
        }
        Some((batch, queue.into()))
    }

    fn detach_decode_queue(
        &mut self,
        signature: &DecodeSignature,
    ) -> Option<(BatchId, Vec<WaiterHandle<P>>)> {
        let queue = self.decode.remove(signature)?;
        let batch = self.allocate_batch();
        for waiter in &queue {
            self.members.insert(waiter.id(), Membership::Detached(batch));
        }
        Some((batch, queue.into()))
    }
}

/// Deduplicates concurrent fetch and decode requests and fans results out.
///
/// Two locks are involved. The coordinator lock guards the queue state as a
/// unit. Each waiter's delivery lock is held while re-checking its membership
/// and running its callback, so callbacks for one waiter never overlap and a
/// cancelled waiter is never notified. The coordinator lock is never held
/// while calling the observer or a waiter.
pub struct RequestCoordinator<P> {
    state: Mutex<QueueState<P>>,
    observer: Arc<dyn AsyncOperationsObserver>,
    pixel_format: PixelFormat,
}

impl<P> RequestCoordinator<P> {
    /// Creates a coordinator that decodes into `pixel_format`.
    pub fn new(observer: Arc<dyn AsyncOperationsObserver>, pixel_format: PixelFormat) -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            observer,
            pixel_format,
        }
    }

    /// Returns the pixel format used for every signature this coordinator forms.
    #[must_use]
    pub const fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Forms the signature `resource` decodes to under `scaling`.
    pub fn signature_for(
        &self,
        resource: &ResourceId,
        scaling: &ScalingDescriptor,
    ) -> DecodeSignature {
        let sample_size = self.observer.sample_size(resource, scaling);
        DecodeSignature::new(resource.clone(), sample_size, self.pixel_format)
    }

    /// Returns true if a fetch for `resource` has waiters queued.
    pub fn is_network_request_pending(&self, resource: &ResourceId) -> bool {
        self.state.lock().network.contains_key(resource)
    }

    /// Returns true if a decode for `signature` has waiters queued.
    pub fn is_decode_request_pending(&self, signature: &DecodeSignature) -> bool {
        self.state.lock().decode.contains_key(signature)
    }

    /// Returns the number of registered waiters across both queues.
    pub fn pending_waiters(&self) -> usize {
        self.state.lock().members.len()
    }

    /// Queues `waiter` on a matching in-flight fetch or decode, if any.
    ///
    /// A pending fetch of `resource` takes priority. Otherwise the observer
    /// computes the sample size and the waiter joins a pending decode of the
    /// resulting signature. On [`AsyncOperationState::NotQueued`] the caller
    /// must register the waiter before starting the job.
    pub fn try_join(
        &self,
        waiter: &WaiterHandle<P>,
        resource: &ResourceId,
        scaling: ScalingDescriptor,
    ) -> AsyncOperationState {
        let queued = self.join_pending(waiter, resource, scaling, None);
        if queued != AsyncOperationState::NotQueued {
            return queued;
        }

        let signature = self.signature_for(resource, &scaling);
        self.join_pending(waiter, resource, scaling, Some(&signature))
    }

    /// Queues `waiter` on the fetch of `resource`, creating the entry if needed.
    ///
    /// A waiter already queued elsewhere is moved here.
    pub fn register_for_network(
        &self,
        waiter: &WaiterHandle<P>,
        resource: &ResourceId,
        scaling: ScalingDescriptor,
    ) -> Registration {
        let (registration, orphan) = self
            .state
            .lock()
            .register_network(waiter, resource, Some(scaling));

        debug!(
            resource = %resource,
            waiter = %waiter.id(),
            ?registration,
            "Registered for network fetch"
        );
        self.cancel_orphan(orphan);
        registration
    }

    /// Queues `waiter` on the fetch of `resource` without asking for a decode.
    ///
    /// The waiter holds the fetch open so later requests join it. It is
    /// released silently once the fetch succeeds and is failed like any other
    /// network waiter otherwise.
    pub fn register_for_prefetch(
        &self,
        waiter: &WaiterHandle<P>,
        resource: &ResourceId,
    ) -> Registration {
        let (registration, orphan) = self
            .state
            .lock()
            .register_network(waiter, resource, None);

        debug!(
            resource = %resource,
            waiter = %waiter.id(),
            ?registration,
            "Registered for prefetch"
        );
        self.cancel_orphan(orphan);
        registration
    }

    /// Queues `waiter` on the decode of `resource` at `sample_size`, creating
    /// the entry if needed.
    ///
    /// A waiter already queued elsewhere is moved here.
    pub fn register_for_decode(
        &self,
        waiter: &WaiterHandle<P>,
        resource: &ResourceId,
        sample_size: NonZeroU32,
    ) -> Registration {
        let signature = DecodeSignature::new(resource.clone(), sample_size, self.pixel_format);
        let (registration, orphan) = self.state.lock().register_decode(waiter, &signature);

        debug!(
            signature = %signature,
            waiter = %waiter.id(),
            ?registration,
            "Registered for decode"
        );
        self.cancel_orphan(orphan);
        registration
    }

    /// Moves every waiter on the fetch of `resource` onto decode queues.
    ///
    /// Returns each signature whose decode queue was created by this hand-off,
    /// once. The caller must start exactly one decode per returned signature.
    /// Signatures that already had a decode in flight are joined, not returned.
    pub fn on_fetch_succeeded(&self, resource: &ResourceId) -> Vec<DecodeSignature> {
        let Some((batch, requests)) = self.state.lock().detach_network_queue(resource) else {
            trace!(resource = %resource, "Fetch succeeded with no waiters");
            return Vec::new();
        };

        let routed: Vec<(WaiterHandle<P>, Option<DecodeSignature>)> = requests
            .into_iter()
            .map(|request| {
                let signature = request
                    .scaling
                    .map(|scaling| self.signature_for(resource, &scaling));
                (request.waiter, signature)
            })
            .collect();

        let mut created = Vec::new();
        let mut state = self.state.lock();
        for (waiter, signature) in routed {
            if !state.claim(waiter.id(), batch) {
                continue;
            }
            let Some(signature) = signature else {
                continue;
            };
            if state.enqueue_decode(waiter, &signature).must_start()
                && !created.contains(&signature)
            {
                created.push(signature);
            }
        }
        drop(state);

        debug!(
            resource = %resource,
            decodes = created.len(),
            "Fetch succeeded, waiters moved to decode"
        );
        created
    }

    /// Fails every waiter on the fetch of `resource`, in registration order.
    pub fn on_fetch_failed(&self, resource: &ResourceId) {
        let Some((batch, requests)) = self.state.lock().detach_network_queue(resource) else {
            return;
        };
        let waiters = requests.into_iter().map(|request| request.waiter);
        let notified = self.deliver(batch, waiters, |waiter| {
            waiter.notify_failure(LoadFailure::FetchFailed);
        });
        debug!(resource = %resource, notified, "Fetch failed");
    }

    /// Fails every waiter on the decode of `signature`, in registration order.
    pub fn on_decode_failed(&self, signature: &DecodeSignature) {
        let Some((batch, waiters)) = self.state.lock().detach_decode_queue(signature) else {
            return;
        };
        let notified = self.deliver(batch, waiters, |waiter| {
            waiter.notify_failure(LoadFailure::DecodeFailed);
        });
        debug!(signature = %signature, notified, "Decode failed");
    }

    /// Removes `waiter` from whichever queue holds it.
    ///
    /// Waits for a callback already running on `waiter` to return, so no
    /// callback runs after this returns. Cancels the underlying job only when
    /// the waiter was the last one on it. Cancelling an unknown or already
    /// resolved waiter is a no-op.
    pub fn cancel(&self, waiter: &WaiterHandle<P>) {
        let orphan = {
            let _delivery = waiter.lock_delivery();
            self.state.lock().detach(waiter.id())
        };
        trace!(waiter = %waiter.id(), "Cancelled waiter");
        self.cancel_orphan(orphan);
    }

    /// Joins the pending fetch of `resource`, or else the pending decode of
    /// `signature` when one is given, under a single lock acquisition.
    fn join_pending(
        &self,
        waiter: &WaiterHandle<P>,
        resource: &ResourceId,
        scaling: ScalingDescriptor,
        signature: Option<&DecodeSignature>,
    ) -> AsyncOperationState {
        let mut state = self.state.lock();
        let (queued, orphan) = if state.network.contains_key(resource) {
            let (_, orphan) = state.register_network(waiter, resource, Some(scaling));
            (AsyncOperationState::QueuedForNetwork, orphan)
        } else if let Some(signature) = signature.filter(|s| state.decode.contains_key(*s)) {
            let (_, orphan) = state.register_decode(waiter, signature);
            (AsyncOperationState::QueuedForDecode, orphan)
        } else {
            return AsyncOperationState::NotQueued;
        };
        drop(state);

        debug!(resource = %resource, waiter = %waiter.id(), ?queued, "Joined in-flight request");
        self.cancel_orphan(orphan);
        queued
    }

    fn cancel_orphan(&self, orphan: Option<OrphanedJob>) {
        match orphan {
            Some(OrphanedJob::Fetch(resource)) => {
                debug!(resource = %resource, "Last waiter gone, cancelling fetch");
                self.observer.cancel_network_fetch(&resource);
            }
            Some(OrphanedJob::Decode(signature)) => {
                debug!(signature = %signature, "Last waiter gone, cancelling decode");
                self.observer
                    .cancel_decode(signature.resource(), signature.sample_size());
            }
            None => {}
        }
    }

    /// Delivers to each waiter of `batch` in order, skipping any that were
    /// cancelled or re-registered after the batch was detached.
    fn deliver(
        &self,
        batch: BatchId,
        waiters: impl IntoIterator<Item = WaiterHandle<P>>,
        notify: impl Fn(&WaiterHandle<P>),
    ) -> usize {
        let mut notified = 0;
        for waiter in waiters {
            let _delivery = waiter.lock_delivery();
            let claimed = self.state.lock().claim(waiter.id(), batch);
            if claimed {
                notify(&waiter);
                notified += 1;
            } else {
                trace!(waiter = %waiter.id(), "Waiter cancelled before delivery");
            }
        }
        notified
    }
}

impl<P: Clone> RequestCoordinator<P> {
    /// Delivers `payload` to every waiter on the decode of `signature`, in
    /// registration order.
    pub fn on_decode_succeeded(&self, signature: &DecodeSignature, payload: &P) {
        let Some((batch, waiters)) = self.state.lock().detach_decode_queue(signature) else {
            return;
        };
        let notified = self.deliver(batch, waiters, |waiter| {
            waiter.notify_available(payload.clone());
        });
        debug!(signature = %signature, notified, "Decode succeeded");
    }
}

impl<P> std::fmt::Debug for RequestCoordinator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RequestCoordinator")
            .field("network_queues", &state.network.len())
            .field("decode_queues", &state.decode.len())
            .field("waiters", &state.members.len())
            .field("pixel_format", &self.pixel_format)
            .finish_non_exhaustive()
    }
}
