//! Application configuration.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{AppConfig, CacheConfig, LogLevel, PrecacheConfig, SimulationConfig};
pub use args::{CliArgs, WorkloadArgs};
pub use storage::{ConfigError, StorageManager};
