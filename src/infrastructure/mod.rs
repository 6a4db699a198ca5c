//! Infrastructure layer with the loader, caches and backend adapters.

/// Application configuration.
pub mod config;
/// Image loading (coalescing, caching, simulated backend).
pub mod image;

pub use config::{AppConfig, CliArgs, ConfigError, LogLevel, StorageManager, WorkloadArgs};
pub use image::{
    CacheStats, ChannelWaiter, DecodedImage, ImageCacher, ImageLoadedEvent, LookupOutcome,
    LruPayloadCache, RequestCoordinator, SimulatedBackend, SimulatedBackendConfig,
    dispatch_events,
};
