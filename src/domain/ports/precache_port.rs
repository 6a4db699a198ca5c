//! Ports used by the scroll-aware precache assistant.

use crate::domain::entities::{ResourceId, ScalingDescriptor};

/// One image a list row will need, with the bounds of the view it lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheRequest {
    /// Image to precache.
    pub resource: ResourceId,
    /// Bounds of the target view. Unbounded if unknown.
    pub bounds: ScalingDescriptor,
}

impl PrecacheRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(resource: impl Into<ResourceId>, bounds: ScalingDescriptor) -> Self {
        Self {
            resource: resource.into(),
            bounds,
        }
    }
}

/// Supplies the rows of a scrolling list.
#[cfg_attr(test, mockall::automock)]
pub trait PrecacheInformationProvider: Send + Sync {
    /// Number of rows in the list.
    fn count(&self) -> usize;

    /// Images required by the row at `position`. Empty if none.
    fn requests_for_row(&self, position: usize) -> Vec<PrecacheRequest>;
}

/// Loader operations the precache assistant drives.
#[cfg_attr(test, mockall::automock)]
pub trait PrecachePort: Send + Sync {
    /// Makes sure the source bytes are stored locally.
    fn precache_to_disk(&self, resource: &ResourceId);

    /// Makes sure the decoded rendition for `bounds` is in the memory cache.
    fn precache_to_memory(&self, resource: &ResourceId, bounds: ScalingDescriptor);
}
