mod async_operations_port;
mod image_waiter_port;
mod payload_cache_port;
mod precache_port;

pub use async_operations_port::AsyncOperationsObserver;
pub use image_waiter_port::{ImageWaiter, NoopWaiter};
pub use payload_cache_port::PayloadCachePort;
pub use precache_port::{PrecacheInformationProvider, PrecachePort, PrecacheRequest};
