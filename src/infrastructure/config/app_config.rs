//! Application configuration.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::domain::entities::{PixelFormat, ResourceId};
use crate::infrastructure::image::{DEFAULT_MEMORY_BUDGET, SimulatedBackendConfig};

const APP_NAME: &str = "imageflight";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Memory cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Scroll precache configuration.
    #[serde(default)]
    pub precache: PrecacheConfig,

    /// Simulated backend configuration.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Memory cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Byte budget of the decoded payload cache.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: u64,

    /// Pixel format renditions are decoded into.
    #[serde(default)]
    pub pixel_format: PixelFormat,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: default_memory_budget(),
            pixel_format: PixelFormat::default(),
        }
    }
}

/// Scroll precache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecacheConfig {
    /// Rows ahead of the visible position to decode into memory.
    #[serde(default = "default_memory_range")]
    pub memory_range: usize,

    /// Rows beyond the memory range to fetch to disk.
    #[serde(default = "default_disk_range")]
    pub disk_range: usize,
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            memory_range: default_memory_range(),
            disk_range: default_disk_range(),
        }
    }
}

/// Simulated backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Milliseconds a fetch takes.
    #[serde(default = "default_fetch_delay_ms")]
    pub fetch_delay_ms: u64,

    /// Milliseconds a decode takes.
    #[serde(default = "default_decode_delay_ms")]
    pub decode_delay_ms: u64,

    /// Intrinsic width of synthesized images.
    #[serde(default = "default_image_dimension")]
    pub image_width: u32,

    /// Intrinsic height of synthesized images.
    #[serde(default = "default_image_dimension")]
    pub image_height: u32,

    /// Resources whose fetch always fails.
    #[serde(default)]
    pub fail_resources: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fetch_delay_ms: default_fetch_delay_ms(),
            decode_delay_ms: default_decode_delay_ms(),
            image_width: default_image_dimension(),
            image_height: default_image_dimension(),
            fail_resources: Vec::new(),
        }
    }
}

const fn default_memory_budget() -> u64 {
    DEFAULT_MEMORY_BUDGET
}

const fn default_memory_range() -> usize {
    4
}

const fn default_disk_range() -> usize {
    10
}

const fn default_fetch_delay_ms() -> u64 {
    50
}

const fn default_decode_delay_ms() -> u64 {
    10
}

const fn default_image_dimension() -> u32 {
    512
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: CliArgs) {
        if let Some(config_path) = args.config {
            self.config = Some(config_path);
        }
        if let Some(log_path) = args.log_path {
            self.log_path = Some(log_path);
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(memory_budget) = args.memory_budget {
            self.cache.memory_budget_bytes = memory_budget;
        }
        if let Some(memory_range) = args.memory_range {
            self.precache.memory_range = memory_range;
        }
        if let Some(disk_range) = args.disk_range {
            self.precache.disk_range = disk_range;
        }
        if let Some(fetch_delay_ms) = args.fetch_delay_ms {
            self.simulation.fetch_delay_ms = fetch_delay_ms;
        }
        if let Some(decode_delay_ms) = args.decode_delay_ms {
            self.simulation.decode_delay_ms = decode_delay_ms;
        }
        if !args.fail.is_empty() {
            self.simulation.fail_resources.extend(args.fail);
        }
    }

    /// Builds the simulated backend configuration.
    #[must_use]
    pub fn backend_config(&self) -> SimulatedBackendConfig {
        SimulatedBackendConfig {
            fetch_delay: Duration::from_millis(self.simulation.fetch_delay_ms),
            decode_delay: Duration::from_millis(self.simulation.decode_delay_ms),
            image_width: self.simulation.image_width,
            image_height: self.simulation.image_height,
            fail_resources: self
                .simulation
                .fail_resources
                .iter()
                .map(|r| ResourceId::from(r.as_str()))
                .collect::<HashSet<_>>(),
            pixel_format: self.cache.pixel_format,
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("imageflight.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}
