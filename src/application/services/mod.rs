pub mod precache_assistant;

pub use precache_assistant::{
    DEFAULT_DISK_RANGE, DEFAULT_MEMORY_RANGE, PrecacheAssistant, PrecacheRanges, ScrollDirection,
    ScrollTracker,
};
