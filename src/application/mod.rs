//! Application layer with services built on the loader API.

/// Application services.
pub mod services;

pub use services::{PrecacheAssistant, PrecacheRanges, ScrollDirection, ScrollTracker};
