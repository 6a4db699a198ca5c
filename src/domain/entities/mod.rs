//! Domain entity definitions.

mod signature;
mod waiter;

pub use signature::{DecodeSignature, PixelFormat, ResourceId, ScalingDescriptor};
pub use waiter::{WaiterHandle, WaiterId};
