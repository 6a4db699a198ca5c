//! Memory cache in front of request coalescing.
//!
//! Implements the lookup order: memory cache, then an in-flight job, then a
//! new decode from the local copy or a new network fetch.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::domain::entities::{
    DecodeSignature, PixelFormat, ResourceId, ScalingDescriptor, WaiterHandle,
};
use crate::domain::ports::{
    AsyncOperationsObserver, NoopWaiter, PayloadCachePort, PrecachePort,
};

use super::coordinator::{AsyncOperationState, RequestCoordinator};
use super::memory_cache::{CacheStats, LruPayloadCache};

/// How a [`ImageCacher::get_payload`] request was served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome<P> {
    /// Served synchronously from the memory cache. No callback follows.
    Hit(P),
    /// Joined a job already in flight.
    Joined(AsyncOperationState),
    /// Started a new network fetch.
    FetchStarted,
    /// Started a new decode of the local copy.
    DecodeStarted,
}

impl<P> LookupOutcome<P> {
    /// Returns true if the waiter will receive a callback.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        !matches!(self, Self::Hit(_))
    }
}

/// Facade over the memory cache, the coordinator, and the backend observer.
pub struct ImageCacher<P> {
    cache: Arc<LruPayloadCache<P>>,
    coordinator: RequestCoordinator<P>,
    observer: Arc<dyn AsyncOperationsObserver>,
}

impl<P: Clone + Send + Sync + 'static> ImageCacher<P> {
    /// Creates a facade over `cache` that starts jobs through `observer`.
    pub fn new(
        cache: Arc<LruPayloadCache<P>>,
        observer: Arc<dyn AsyncOperationsObserver>,
        pixel_format: PixelFormat,
    ) -> Self {
        Self {
            cache,
            coordinator: RequestCoordinator::new(Arc::clone(&observer), pixel_format),
            observer,
        }
    }

    /// Returns the underlying coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &RequestCoordinator<P> {
        &self.coordinator
    }

    /// Looks up the rendition of `resource` for `scaling`.
    ///
    /// On anything but a cache hit, `waiter` is queued and later receives
    /// exactly one callback unless cancelled.
    pub fn get_payload(
        &self,
        waiter: &WaiterHandle<P>,
        resource: &ResourceId,
        scaling: ScalingDescriptor,
    ) -> LookupOutcome<P> {
        let signature = self.coordinator.signature_for(resource, &scaling);
        if let Some(payload) = self.cache.get(&signature) {
            trace!(signature = %signature, "Served from memory cache");
            return LookupOutcome::Hit(payload);
        }

        match self.coordinator.try_join(waiter, resource, scaling) {
            AsyncOperationState::NotQueued => {}
            joined => return LookupOutcome::Joined(joined),
        }

        let sample_size = signature.sample_size();
        if self.observer.has_local_copy(resource) {
            if !self
                .coordinator
                .register_for_decode(waiter, resource, sample_size)
                .must_start()
            {
                return LookupOutcome::Joined(AsyncOperationState::QueuedForDecode);
            }
            debug!(signature = %signature, "Starting decode of local copy");
            self.observer.start_decode(resource, sample_size);
            LookupOutcome::DecodeStarted
        } else {
            if !self
                .coordinator
                .register_for_network(waiter, resource, scaling)
                .must_start()
            {
                return LookupOutcome::Joined(AsyncOperationState::QueuedForNetwork);
            }
            debug!(resource = %resource, "Starting network fetch");
            self.observer.start_network_fetch(resource);
            LookupOutcome::FetchStarted
        }
    }

    /// Withdraws `waiter` from whatever it is queued on.
    pub fn cancel(&self, waiter: &WaiterHandle<P>) {
        self.coordinator.cancel(waiter);
    }

    /// Hands the waiters of a completed fetch to decode, starting one decode
    /// per distinct signature.
    pub fn on_fetch_succeeded(&self, resource: &ResourceId) {
        for signature in self.coordinator.on_fetch_succeeded(resource) {
            debug!(signature = %signature, "Starting decode after fetch");
            self.observer
                .start_decode(signature.resource(), signature.sample_size());
        }
    }

    /// Fails every waiter of the fetch of `resource`.
    pub fn on_fetch_failed(&self, resource: &ResourceId) {
        warn!(resource = %resource, "Network fetch failed");
        self.coordinator.on_fetch_failed(resource);
    }

    /// Caches a decoded payload and delivers it to its waiters.
    pub fn on_decode_succeeded(&self, signature: &DecodeSignature, payload: P, byte_size: u64) {
        self.cache.put(signature.clone(), payload.clone(), byte_size);
        self.coordinator.on_decode_succeeded(signature, &payload);
    }

    /// Fails every waiter of the decode of `signature`.
    pub fn on_decode_failed(&self, signature: &DecodeSignature) {
        warn!(signature = %signature, "Decode failed");
        self.coordinator.on_decode_failed(signature);
    }

    /// Changes the memory budget, evicting immediately if it shrank.
    pub fn set_memory_budget(&self, bytes: u64) {
        self.cache.set_maximum_size(bytes);
    }

    /// Drops every cached payload.
    pub fn clear_memory_cache(&self) {
        self.cache.clear();
        info!("Cleared memory cache");
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl<P: Clone + Send + Sync + 'static> PrecachePort for ImageCacher<P> {
    fn precache_to_disk(&self, resource: &ResourceId) {
        if self.observer.has_local_copy(resource)
            || self.coordinator.is_network_request_pending(resource)
        {
            return;
        }
        let waiter = WaiterHandle::new(Arc::new(NoopWaiter));
        if self
            .coordinator
            .register_for_prefetch(&waiter, resource)
            .must_start()
        {
            debug!(resource = %resource, "Precaching to disk");
            self.observer.start_network_fetch(resource);
        }
    }

    fn precache_to_memory(&self, resource: &ResourceId, bounds: ScalingDescriptor) {
        let waiter = WaiterHandle::new(Arc::new(NoopWaiter));
        let outcome = self.get_payload(&waiter, resource, bounds);
        trace!(resource = %resource, pending = outcome.is_pending(), "Precaching to memory");
    }
}

impl<P> std::fmt::Debug for ImageCacher<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCacher")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::LoadFailure;
    use crate::domain::ports::mocks::{
        Journal, MockAsyncOperationsObserver, Outcome, RecordingWaiter,
    };
    use mockall::predicate::eq;
    use parking_lot::Mutex;
    use std::num::NonZeroU32;

    fn nz(v: u32) -> NonZeroU32 {
        NonZeroU32::new(v).unwrap()
    }

    fn scale(sample: u32) -> ScalingDescriptor {
        ScalingDescriptor::bounded(sample, 0)
    }

    fn observer(local_copy: bool) -> MockAsyncOperationsObserver {
        let mut observer = MockAsyncOperationsObserver::new();
        observer
            .expect_sample_size()
            .returning(|_, scaling| scaling.width().unwrap_or(NonZeroU32::MIN));
        observer
            .expect_has_local_copy()
            .return_const(local_copy);
        observer
    }

    fn cacher(observer: MockAsyncOperationsObserver) -> ImageCacher<u32> {
        ImageCacher::new(
            Arc::new(LruPayloadCache::new(100)),
            Arc::new(observer),
            PixelFormat::Argb8888,
        )
    }

    fn waiter(label: &'static str, journal: &Journal<u32>) -> WaiterHandle<u32> {
        WaiterHandle::new(Arc::new(RecordingWaiter::new(label, Arc::clone(journal))))
    }

    fn sig(resource: &str, sample: u32) -> DecodeSignature {
        DecodeSignature::new(resource.into(), nz(sample), PixelFormat::Argb8888)
    }

    #[test]
    fn test_concurrent_requests_share_one_fetch_and_decode() {
        let mut observer = observer(false);
        observer
            .expect_start_network_fetch()
            .with(eq(ResourceId::from("r1")))
            .times(1)
            .return_const(());
        observer
            .expect_start_decode()
            .with(eq(ResourceId::from("r1")), eq(nz(1)))
            .times(1)
            .return_const(());
        let cacher = cacher(observer);
        let log: Journal<u32> = Arc::new(Mutex::new(Vec::new()));
        let r1 = ResourceId::from("r1");

        assert_eq!(
            cacher.get_payload(&waiter("w1", &log), &r1, scale(1)),
            LookupOutcome::FetchStarted
        );
        for label in ["w2", "w3"] {
            assert_eq!(
                cacher.get_payload(&waiter(label, &log), &r1, scale(1)),
                LookupOutcome::Joined(AsyncOperationState::QueuedForNetwork)
            );
        }

        cacher.on_fetch_succeeded(&r1);
        cacher.on_decode_succeeded(&sig("r1", 1), 42, 10);

        assert_eq!(log.lock().len(), 3);
        assert!(log
            .lock()
            .iter()
            .all(|(_, outcome)| *outcome == Outcome::Available(42)));
        assert_eq!(
            cacher.get_payload(&waiter("w4", &log), &r1, scale(1)),
            LookupOutcome::Hit(42)
        );
        assert_eq!(cacher.cache_stats().entries, 1);
    }

    #[test]
    fn test_decode_starts_per_distinct_sample_size() {
        let mut observer = observer(false);
        observer
            .expect_start_network_fetch()
            .times(1)
            .return_const(());
        observer
            .expect_start_decode()
            .with(eq(ResourceId::from("r1")), eq(nz(1)))
            .times(1)
            .return_const(());
        observer
            .expect_start_decode()
            .with(eq(ResourceId::from("r1")), eq(nz(2)))
            .times(1)
            .return_const(());
        let cacher = cacher(observer);
        let log: Journal<u32> = Arc::new(Mutex::new(Vec::new()));
        let r1 = ResourceId::from("r1");

        for (label, sample) in [("w1", 1), ("w2", 2), ("w3", 1), ("w4", 2), ("w5", 2)] {
            cacher.get_payload(&waiter(label, &log), &r1, scale(sample));
        }
        cacher.on_fetch_succeeded(&r1);
    }

    #[test]
    fn test_local_copy_skips_network() {
        let mut observer = observer(true);
        observer.expect_start_network_fetch().never();
        observer
            .expect_start_decode()
            .with(eq(ResourceId::from("r1")), eq(nz(2)))
            .times(1)
            .return_const(());
        let cacher = cacher(observer);
        let log: Journal<u32> = Arc::new(Mutex::new(Vec::new()));
        let r1 = ResourceId::from("r1");

        assert_eq!(
            cacher.get_payload(&waiter("w1", &log), &r1, scale(2)),
            LookupOutcome::DecodeStarted
        );
        assert_eq!(
            cacher.get_payload(&waiter("w2", &log), &r1, scale(2)),
            LookupOutcome::Joined(AsyncOperationState::QueuedForDecode)
        );
    }

    #[test]
    fn test_decode_failure_is_not_cached() {
        let mut observer = observer(true);
        observer.expect_start_decode().return_const(());
        let cacher = cacher(observer);
        let log: Journal<u32> = Arc::new(Mutex::new(Vec::new()));
        let r1 = ResourceId::from("r1");

        cacher.get_payload(&waiter("w1", &log), &r1, scale(1));
        cacher.on_decode_failed(&sig("r1", 1));

        assert_eq!(
            *log.lock(),
            vec![("w1", Outcome::Failed(LoadFailure::DecodeFailed))]
        );
        assert_eq!(cacher.cache_stats().entries, 0);
    }

    #[test]
    fn test_cancel_last_waiter_cancels_fetch() {
        let mut observer = observer(false);
        observer.expect_start_network_fetch().return_const(());
        observer
            .expect_cancel_network_fetch()
            .with(eq(ResourceId::from("r1")))
            .times(1)
            .return_const(());
        let cacher = cacher(observer);
        let log: Journal<u32> = Arc::new(Mutex::new(Vec::new()));
        let w1 = waiter("w1", &log);

        cacher.get_payload(&w1, &"r1".into(), scale(1));
        cacher.cancel(&w1);
        cacher.on_fetch_failed(&"r1".into());

        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_precache_to_disk_skips_pending_fetch() {
        let mut observer = observer(false);
        observer
            .expect_start_network_fetch()
            .with(eq(ResourceId::from("r1")))
            .times(1)
            .return_const(());
        let cacher = cacher(observer);
        let log: Journal<u32> = Arc::new(Mutex::new(Vec::new()));
        let r1 = ResourceId::from("r1");

        cacher.get_payload(&waiter("w1", &log), &r1, scale(1));
        cacher.precache_to_disk(&r1);
    }

    #[test]
    fn test_request_joins_disk_precache_fetch() {
        let mut observer = observer(false);
        observer
            .expect_start_network_fetch()
            .with(eq(ResourceId::from("r1")))
            .times(1)
            .return_const(());
        observer
            .expect_start_decode()
            .with(eq(ResourceId::from("r1")), eq(nz(1)))
            .times(1)
            .return_const(());
        let cacher = cacher(observer);
        let log: Journal<u32> = Arc::new(Mutex::new(Vec::new()));
        let r1 = ResourceId::from("r1");

        cacher.precache_to_disk(&r1);
        cacher.precache_to_disk(&r1);
        assert_eq!(
            cacher.get_payload(&waiter("w1", &log), &r1, scale(1)),
            LookupOutcome::Joined(AsyncOperationState::QueuedForNetwork)
        );

        cacher.on_fetch_succeeded(&r1);
        cacher.on_decode_succeeded(&sig("r1", 1), 8, 4);

        assert_eq!(*log.lock(), vec![("w1", Outcome::Available(8))]);
        assert_eq!(cacher.coordinator.pending_waiters(), 0);
    }

    #[test]
    fn test_shrinking_budget_evicts() {
        let mut observer = observer(true);
        observer.expect_start_decode().return_const(());
        let cacher = cacher(observer);

        cacher.on_decode_succeeded(&sig("r1", 1), 1, 40);
        cacher.on_decode_succeeded(&sig("r2", 1), 2, 40);
        cacher.set_memory_budget(50);

        let stats = cacher.cache_stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.bytes, 40);

        cacher.clear_memory_cache();
        assert_eq!(cacher.cache_stats().entries, 0);
    }
}
