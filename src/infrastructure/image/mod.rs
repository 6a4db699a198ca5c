//! Image loading infrastructure.
//!
//! This module provides:
//! - Request coalescing for network fetches and decodes
//! - A byte-budgeted LRU cache for decoded payloads
//! - The loader facade tying both together
//! - A tokio-backed simulated network and decode backend

pub mod cacher;
pub mod coordinator;
pub mod memory_cache;
pub mod simulated;

pub use cacher::{ImageCacher, LookupOutcome};
pub use coordinator::{AsyncOperationState, Registration, RequestCoordinator};
pub use memory_cache::{CacheStats, DEFAULT_MEMORY_BUDGET, LruPayloadCache};
pub use simulated::{
    BackendCounters, BackendError, BackendEvent, ChannelWaiter, DecodedImage, ImageLoadedEvent,
    SimulatedBackend, SimulatedBackendConfig, dispatch_events,
};
