//! Port for the network and decode collaborators driven by the coordinator.

use std::num::NonZeroU32;

use crate::domain::entities::{ResourceId, ScalingDescriptor};

/// Collaborator that owns the actual network transport and disk decode.
///
/// The coordinator only asks it for sample sizes and issues start/cancel
/// signals; completions come back through the coordinator's `on_*` hooks.
/// Never invoked with a coordinator lock held, so implementations may call
/// back into the coordinator synchronously.
#[cfg_attr(test, mockall::automock)]
pub trait AsyncOperationsObserver: Send + Sync {
    /// Computes the sample size for decoding `resource` into `scaling`.
    fn sample_size(&self, resource: &ResourceId, scaling: &ScalingDescriptor) -> NonZeroU32;

    /// Starts fetching `resource` from the network.
    fn start_network_fetch(&self, resource: &ResourceId);

    /// Cancels an in-flight fetch of `resource`.
    fn cancel_network_fetch(&self, resource: &ResourceId);

    /// Starts decoding the local copy of `resource` at `sample_size`.
    fn start_decode(&self, resource: &ResourceId, sample_size: NonZeroU32);

    /// Cancels an in-flight decode of `resource` at `sample_size`.
    fn cancel_decode(&self, resource: &ResourceId, sample_size: NonZeroU32);

    /// Returns true if `resource` is already stored locally and can be decoded
    /// without a fetch.
    fn has_local_copy(&self, _resource: &ResourceId) -> bool {
        false
    }
}
