//! Domain error types.

mod load_failure;

pub use load_failure::LoadFailure;
