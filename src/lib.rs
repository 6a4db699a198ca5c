//! Imageflight - coalesced image loading with a byte-budgeted memory cache.
//!
//! This crate groups concurrent requests for the same image into a single
//! network fetch and a single decode per rendition, keeps decoded payloads in
//! an LRU cache bounded by bytes, and warms that cache ahead of list scrolling.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing services above the loader API.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing the loader, caches, backends and config.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imageflight";
