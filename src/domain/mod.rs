//! Domain layer with core value types, errors, and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{DecodeSignature, PixelFormat, ResourceId, ScalingDescriptor, WaiterHandle};
pub use errors::LoadFailure;
pub use ports::{AsyncOperationsObserver, ImageWaiter, PayloadCachePort};
