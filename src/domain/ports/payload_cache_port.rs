//! Port definition for the decoded payload cache.

use crate::domain::entities::DecodeSignature;

/// Port for in-memory payload caching bounded by a byte budget.
/// Implementations must be thread-safe.
pub trait PayloadCachePort<P>: Send + Sync {
    /// Returns the payload for `signature`, marking it most recently used.
    fn get(&self, signature: &DecodeSignature) -> Option<P>;

    /// Stores `payload` under `signature`, then evicts down to the budget.
    fn put(&self, signature: DecodeSignature, payload: P, byte_size: u64);

    /// Changes the byte budget and evicts down to it immediately.
    fn set_maximum_size(&self, bytes: u64);

    /// Removes every entry.
    fn clear(&self);

    /// Returns the total byte size of stored entries.
    fn size(&self) -> u64;

    /// Returns the number of stored entries.
    fn count(&self) -> usize;

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}
