//! In-process network and decode backend driven by tokio tasks.
//!
//! Fetches synthesize PNG bytes after a delay and keep them in an in-memory
//! disk; decodes read those bytes back through the `image` crate and
//! downsample by the requested sample size. Completions are reported as
//! [`BackendEvent`]s on a channel consumed by [`dispatch_events`].

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace, warn};

use crate::domain::entities::{DecodeSignature, PixelFormat, ResourceId, ScalingDescriptor};
use crate::domain::errors::LoadFailure;
use crate::domain::ports::{AsyncOperationsObserver, ImageWaiter};

use super::cacher::ImageCacher;

/// Payload produced by the simulated decoder.
pub type DecodedImage = Arc<image::DynamicImage>;

/// Errors raised inside simulated jobs. Never escape the backend; they are
/// logged and reported as failures.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Encoding or decoding through the `image` crate failed.
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
    /// A decode was requested for a resource with no local copy.
    #[error("no local copy of {0}")]
    MissingLocalCopy(ResourceId),
    /// The blocking codec task panicked or was aborted.
    #[error("codec task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Completion reported by a simulated job.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// The resource is now stored locally.
    FetchSucceeded(ResourceId),
    /// The resource could not be fetched.
    FetchFailed(ResourceId),
    /// A rendition was decoded.
    DecodeSucceeded {
        /// Rendition that was decoded.
        signature: DecodeSignature,
        /// The decoded image.
        image: DecodedImage,
        /// Memory footprint of the image in the configured pixel format.
        byte_size: u64,
    },
    /// A rendition could not be decoded.
    DecodeFailed(DecodeSignature),
}

/// Configuration for the simulated backend.
#[derive(Debug, Clone)]
pub struct SimulatedBackendConfig {
    /// Time a fetch takes before completing.
    pub fetch_delay: Duration,
    /// Time a decode takes before completing.
    pub decode_delay: Duration,
    /// Intrinsic width of every synthesized image.
    pub image_width: u32,
    /// Intrinsic height of every synthesized image.
    pub image_height: u32,
    /// Resources whose fetch always fails.
    pub fail_resources: HashSet<ResourceId>,
    /// Pixel format decoded renditions are accounted in.
    pub pixel_format: PixelFormat,
}

impl Default for SimulatedBackendConfig {
    fn default() -> Self {
        Self {
            fetch_delay: Duration::from_millis(50),
            decode_delay: Duration::from_millis(10),
            image_width: 512,
            image_height: 512,
            fail_resources: HashSet::new(),
            pixel_format: PixelFormat::default(),
        }
    }
}

/// Counters of the jobs the backend was asked to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCounters {
    /// Fetches started.
    pub fetches_started: u64,
    /// Decodes started.
    pub decodes_started: u64,
    /// Fetches cancelled while in flight.
    pub fetches_cancelled: u64,
    /// Decodes cancelled while in flight.
    pub decodes_cancelled: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JobKey {
    Fetch(ResourceId),
    Decode(ResourceId, NonZeroU32),
}

#[derive(Default)]
struct Counters {
    fetches_started: AtomicU64,
    decodes_started: AtomicU64,
    fetches_cancelled: AtomicU64,
    decodes_cancelled: AtomicU64,
}

/// State shared between the backend and its spawned jobs.
struct Shared {
    config: SimulatedBackendConfig,
    disk: RwLock<HashMap<ResourceId, Bytes>>,
    jobs: Mutex<HashMap<JobKey, (u64, AbortHandle)>>,
    next_job: AtomicU64,
    event_tx: mpsc::UnboundedSender<BackendEvent>,
}

impl Shared {
    fn finish(&self, key: &JobKey, generation: u64, event: BackendEvent) {
        {
            let mut jobs = self.jobs.lock();
            if jobs.get(key).is_some_and(|(g, _)| *g == generation) {
                jobs.remove(key);
            }
        }
        if let Err(e) = self.event_tx.send(event) {
            error!("Failed to send backend event: {}", e);
        }
    }

    async fn fetch(&self, resource: &ResourceId) -> Option<Bytes> {
        tokio::time::sleep(self.config.fetch_delay).await;
        if self.config.fail_resources.contains(resource) {
            return None;
        }

        let (width, height) = (self.config.image_width, self.config.image_height);
        match tokio::task::spawn_blocking(move || synthesize_png(width, height)).await {
            Ok(Ok(bytes)) => {
                self.disk.write().insert(resource.clone(), bytes.clone());
                Some(bytes)
            }
            Ok(Err(e)) => {
                warn!(resource = %resource, error = %e, "Failed to synthesize image");
                None
            }
            Err(e) => {
                warn!(resource = %resource, error = %BackendError::from(e), "Fetch task failed");
                None
            }
        }
    }

    async fn decode(
        &self,
        signature: &DecodeSignature,
    ) -> Result<(DecodedImage, u64), BackendError> {
        tokio::time::sleep(self.config.decode_delay).await;
        let bytes = self
            .disk
            .read()
            .get(signature.resource())
            .cloned()
            .ok_or_else(|| BackendError::MissingLocalCopy(signature.resource().clone()))?;

        let sample = signature.sample_size().get();
        let decoded = tokio::task::spawn_blocking(move || decode_sampled(&bytes, sample)).await??;

        let byte_size = u64::from(decoded.width())
            * u64::from(decoded.height())
            * signature.pixel_format().bytes_per_pixel();
        Ok((Arc::new(decoded), byte_size))
    }
}

fn decode_sampled(bytes: &[u8], sample: u32) -> Result<image::DynamicImage, BackendError> {
    let image = image::load_from_memory(bytes)?;
    if sample == 1 {
        return Ok(image);
    }
    let width = (image.width() / sample).max(1);
    let height = (image.height() / sample).max(1);
    Ok(image.resize_exact(width, height, image::imageops::FilterType::Triangle))
}

fn synthesize_png(width: u32, height: u32) -> Result<Bytes, BackendError> {
    #[allow(clippy::cast_possible_truncation)]
    let pixels = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    });
    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(pixels).write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(Bytes::from(buffer.into_inner()))
}

/// Network and decode collaborator backed by tokio tasks.
pub struct SimulatedBackend {
    shared: Arc<Shared>,
    runtime: Handle,
    counters: Counters,
}

impl SimulatedBackend {
    /// Creates a backend that spawns jobs on `runtime` and reports
    /// completions on `event_tx`.
    #[must_use]
    pub fn new(
        config: SimulatedBackendConfig,
        event_tx: mpsc::UnboundedSender<BackendEvent>,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                disk: RwLock::new(HashMap::new()),
                jobs: Mutex::new(HashMap::new()),
                next_job: AtomicU64::new(0),
                event_tx,
            }),
            runtime,
            counters: Counters::default(),
        }
    }

    /// Returns job counters.
    #[must_use]
    pub fn counters(&self) -> BackendCounters {
        BackendCounters {
            fetches_started: self.counters.fetches_started.load(Ordering::Relaxed),
            decodes_started: self.counters.decodes_started.load(Ordering::Relaxed),
            fetches_cancelled: self.counters.fetches_cancelled.load(Ordering::Relaxed),
            decodes_cancelled: self.counters.decodes_cancelled.load(Ordering::Relaxed),
        }
    }

    /// Returns the number of jobs still running.
    #[must_use]
    pub fn running_jobs(&self) -> usize {
        self.shared.jobs.lock().len()
    }

    fn spawn_job<F, Fut>(&self, key: JobKey, job: F)
    where
        F: FnOnce(Arc<Shared>, JobKey, u64) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let generation = self.shared.next_job.fetch_add(1, Ordering::Relaxed);
        let mut jobs = self.shared.jobs.lock();
        let task = self
            .runtime
            .spawn(job(Arc::clone(&self.shared), key.clone(), generation));
        if let Some((_, previous)) = jobs.insert(key, (generation, task.abort_handle())) {
            previous.abort();
        }
    }

    fn abort_job(&self, key: &JobKey) -> bool {
        let removed = self.shared.jobs.lock().remove(key);
        removed.is_some_and(|(_, handle)| {
            handle.abort();
            true
        })
    }
}

impl AsyncOperationsObserver for SimulatedBackend {
    fn sample_size(&self, _resource: &ResourceId, scaling: &ScalingDescriptor) -> NonZeroU32 {
        let config = &self.shared.config;
        scaling.sample_size_for(config.image_width, config.image_height)
    }

    fn start_network_fetch(&self, resource: &ResourceId) {
        self.counters.fetches_started.fetch_add(1, Ordering::Relaxed);
        debug!(resource = %resource, "Simulated fetch started");
        let resource = resource.clone();
        let key = JobKey::Fetch(resource.clone());
        self.spawn_job(key, |shared, key, generation| async move {
            let event = match shared.fetch(&resource).await {
                Some(bytes) => {
                    trace!(resource = %resource, bytes = bytes.len(), "Simulated fetch finished");
                    BackendEvent::FetchSucceeded(resource)
                }
                None => BackendEvent::FetchFailed(resource),
            };
            shared.finish(&key, generation, event);
        });
    }

    fn cancel_network_fetch(&self, resource: &ResourceId) {
        if self.abort_job(&JobKey::Fetch(resource.clone())) {
            self.counters.fetches_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(resource = %resource, "Simulated fetch cancelled");
        }
    }

    fn start_decode(&self, resource: &ResourceId, sample_size: NonZeroU32) {
        self.counters.decodes_started.fetch_add(1, Ordering::Relaxed);
        let signature =
            DecodeSignature::new(resource.clone(), sample_size, self.shared.config.pixel_format);
        debug!(signature = %signature, "Simulated decode started");
        let key = JobKey::Decode(resource.clone(), sample_size);
        self.spawn_job(key, |shared, key, generation| async move {
            let event = match shared.decode(&signature).await {
                Ok((image, byte_size)) => BackendEvent::DecodeSucceeded {
                    signature,
                    image,
                    byte_size,
                },
                Err(e) => {
                    warn!(signature = %signature, error = %e, "Simulated decode failed");
                    BackendEvent::DecodeFailed(signature)
                }
            };
            shared.finish(&key, generation, event);
        });
    }

    fn cancel_decode(&self, resource: &ResourceId, sample_size: NonZeroU32) {
        if self.abort_job(&JobKey::Decode(resource.clone(), sample_size)) {
            self.counters.decodes_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(
                resource = %resource,
                sample_size = sample_size.get(),
                "Simulated decode cancelled"
            );
        }
    }

    fn has_local_copy(&self, resource: &ResourceId) -> bool {
        self.shared.disk.read().contains_key(resource)
    }
}

impl std::fmt::Debug for SimulatedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBackend")
            .field("config", &self.shared.config)
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}

/// Feeds backend completions into `cacher` until every sender is dropped.
pub async fn dispatch_events(
    cacher: Arc<ImageCacher<DecodedImage>>,
    mut events: mpsc::UnboundedReceiver<BackendEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            BackendEvent::FetchSucceeded(resource) => cacher.on_fetch_succeeded(&resource),
            BackendEvent::FetchFailed(resource) => cacher.on_fetch_failed(&resource),
            BackendEvent::DecodeSucceeded {
                signature,
                image,
                byte_size,
            } => cacher.on_decode_succeeded(&signature, image, byte_size),
            BackendEvent::DecodeFailed(signature) => cacher.on_decode_failed(&signature),
        }
    }
    debug!("Backend event channel closed");
}

/// Message sent when a waiter is resolved.
#[derive(Debug, Clone)]
pub struct ImageLoadedEvent {
    /// Caller-chosen request id.
    pub id: usize,
    /// The decoded image, or why it could not be produced.
    pub result: Result<DecodedImage, LoadFailure>,
}

/// Waiter that forwards its outcome to a channel.
#[derive(Debug)]
pub struct ChannelWaiter {
    id: usize,
    tx: mpsc::UnboundedSender<ImageLoadedEvent>,
}

impl ChannelWaiter {
    /// Creates a waiter reporting under `id`.
    #[must_use]
    pub const fn new(id: usize, tx: mpsc::UnboundedSender<ImageLoadedEvent>) -> Self {
        Self { id, tx }
    }

    fn send(&self, result: Result<DecodedImage, LoadFailure>) {
        if self.tx.send(ImageLoadedEvent { id: self.id, result }).is_err() {
            trace!(id = self.id, "Result receiver dropped");
        }
    }
}

impl ImageWaiter<DecodedImage> for ChannelWaiter {
    fn on_available(&self, payload: DecodedImage) {
        self.send(Ok(payload));
    }

    fn on_failure(&self, reason: LoadFailure) {
        self.send(Err(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::WaiterHandle;
    use crate::infrastructure::image::cacher::LookupOutcome;
    use crate::infrastructure::image::memory_cache::LruPayloadCache;

    struct Harness {
        backend: Arc<SimulatedBackend>,
        cacher: Arc<ImageCacher<DecodedImage>>,
        results_tx: mpsc::UnboundedSender<ImageLoadedEvent>,
        results_rx: mpsc::UnboundedReceiver<ImageLoadedEvent>,
    }

    fn harness(config: SimulatedBackendConfig) -> Harness {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pixel_format = config.pixel_format;
        let backend = Arc::new(SimulatedBackend::new(config, event_tx, Handle::current()));
        let cacher = Arc::new(ImageCacher::new(
            Arc::new(LruPayloadCache::new(64 * 1024 * 1024)),
            Arc::clone(&backend) as Arc<dyn AsyncOperationsObserver>,
            pixel_format,
        ));
        tokio::spawn(dispatch_events(Arc::clone(&cacher), event_rx));
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Harness {
            backend,
            cacher,
            results_tx,
            results_rx,
        }
    }

    fn fast_config() -> SimulatedBackendConfig {
        SimulatedBackendConfig {
            fetch_delay: Duration::from_millis(5),
            decode_delay: Duration::from_millis(1),
            image_width: 64,
            image_height: 64,
            ..SimulatedBackendConfig::default()
        }
    }

    async fn collect(
        rx: &mut mpsc::UnboundedReceiver<ImageLoadedEvent>,
        n: usize,
    ) -> Vec<ImageLoadedEvent> {
        let mut events = Vec::with_capacity(n);
        while events.len() < n {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for results")
                .expect("result channel closed");
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_coalesces_fetch_and_groups_decodes() {
        let mut h = harness(fast_config());
        let resource = ResourceId::from("https://images.example/a.png");
        let bounds = [
            ScalingDescriptor::bounded(64, 64),
            ScalingDescriptor::bounded(32, 32),
            ScalingDescriptor::bounded(64, 64),
            ScalingDescriptor::bounded(32, 32),
        ];

        for (id, scaling) in bounds.iter().enumerate() {
            let waiter = WaiterHandle::new(Arc::new(ChannelWaiter::new(id, h.results_tx.clone())));
            let outcome = h.cacher.get_payload(&waiter, &resource, *scaling);
            assert!(outcome.is_pending());
        }

        let mut events = collect(&mut h.results_rx, bounds.len()).await;
        events.sort_by_key(|e| e.id);

        let counters = h.backend.counters();
        assert_eq!(counters.fetches_started, 1);
        assert_eq!(counters.decodes_started, 2);

        let widths: Vec<u32> = events
            .iter()
            .map(|e| e.result.as_ref().map(|img| img.width()).unwrap_or(0))
            .collect();
        assert_eq!(widths, vec![64, 32, 64, 32]);
        assert!(h.backend.has_local_copy(&resource));
        assert_eq!(h.cacher.cache_stats().entries, 2);
    }

    #[tokio::test]
    async fn test_second_request_hits_memory_cache() {
        let mut h = harness(fast_config());
        let resource = ResourceId::from("https://images.example/b.png");
        let scaling = ScalingDescriptor::bounded(16, 16);

        let first = WaiterHandle::new(Arc::new(ChannelWaiter::new(0, h.results_tx.clone())));
        assert_eq!(
            h.cacher.get_payload(&first, &resource, scaling),
            LookupOutcome::FetchStarted
        );
        collect(&mut h.results_rx, 1).await;

        let second = WaiterHandle::new(Arc::new(ChannelWaiter::new(1, h.results_tx.clone())));
        let outcome = h.cacher.get_payload(&second, &resource, scaling);
        assert!(matches!(outcome, LookupOutcome::Hit(ref img) if img.width() == 16));
    }

    #[tokio::test]
    async fn test_failed_fetch_reaches_every_waiter() {
        let resource = ResourceId::from("https://images.example/broken.png");
        let mut config = fast_config();
        config.fail_resources.insert(resource.clone());
        let mut h = harness(config);

        for id in 0..3 {
            let waiter = WaiterHandle::new(Arc::new(ChannelWaiter::new(id, h.results_tx.clone())));
            h.cacher
                .get_payload(&waiter, &resource, ScalingDescriptor::unbounded());
        }

        let events = collect(&mut h.results_rx, 3).await;
        assert!(events
            .iter()
            .all(|e| matches!(e.result, Err(LoadFailure::FetchFailed))));
        assert_eq!(h.backend.counters().fetches_started, 1);
        assert_eq!(h.backend.counters().decodes_started, 0);
    }

    #[tokio::test]
    async fn test_cancelling_only_waiter_aborts_fetch() {
        let mut config = fast_config();
        config.fetch_delay = Duration::from_secs(30);
        let h = harness(config);
        let resource = ResourceId::from("https://images.example/slow.png");

        let waiter = WaiterHandle::new(Arc::new(ChannelWaiter::new(0, h.results_tx.clone())));
        h.cacher
            .get_payload(&waiter, &resource, ScalingDescriptor::unbounded());
        assert_eq!(h.backend.running_jobs(), 1);

        h.cacher.cancel(&waiter);

        assert_eq!(h.backend.counters().fetches_cancelled, 1);
        assert_eq!(h.backend.running_jobs(), 0);
        assert_eq!(h.cacher.coordinator().pending_waiters(), 0);
    }
}
