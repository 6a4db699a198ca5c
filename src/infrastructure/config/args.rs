use super::app_config::LogLevel;
use clap::{Args, Parser};
use std::path::PathBuf;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "imageflight",
    version,
    about = "Coalesced image loading with a byte-budgeted memory cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Byte budget of the decoded payload cache.
    #[arg(long, value_name = "BYTES")]
    pub memory_budget: Option<u64>,

    /// Rows to precache into memory while scrolling.
    #[arg(long)]
    pub memory_range: Option<usize>,

    /// Rows to precache to disk beyond the memory range.
    #[arg(long)]
    pub disk_range: Option<usize>,

    /// Simulated fetch latency in milliseconds.
    #[arg(long, value_name = "MS")]
    pub fetch_delay_ms: Option<u64>,

    /// Simulated decode latency in milliseconds.
    #[arg(long, value_name = "MS")]
    pub decode_delay_ms: Option<u64>,

    /// Resource whose fetch should fail. Repeatable.
    #[arg(long, value_name = "RESOURCE")]
    pub fail: Vec<String>,

    /// Workload of the demonstration run.
    #[command(flatten)]
    pub workload: WorkloadArgs,
}

/// Shape of the simulated request workload.
#[derive(Debug, Clone, Args)]
pub struct WorkloadArgs {
    /// Waiters issued per round.
    #[arg(long, default_value_t = 32)]
    pub requests: usize,

    /// Distinct resources the waiters spread over.
    #[arg(long, default_value_t = 4)]
    pub resources: usize,

    /// Requested view widths, cycled across waiters.
    #[arg(long, value_delimiter = ',', default_value = "512,256,128")]
    pub widths: Vec<u32>,

    /// Rounds to run. Later rounds are served from memory.
    #[arg(long, default_value_t = 2)]
    pub rounds: usize,

    /// Cancel every Nth waiter right after it registers. 0 disables.
    #[arg(long, default_value_t = 0)]
    pub cancel_every: usize,

    /// Rows of a simulated list to scroll through. 0 disables.
    #[arg(long, default_value_t = 0)]
    pub scroll_rows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_defaults() {
        let args = CliArgs::parse_from(["imageflight"]);

        assert_eq!(args.workload.requests, 32);
        assert_eq!(args.workload.resources, 4);
        assert_eq!(args.workload.widths, vec![512, 256, 128]);
        assert_eq!(args.workload.rounds, 2);
        assert_eq!(args.workload.cancel_every, 0);
        assert!(args.memory_budget.is_none());
    }

    #[test]
    fn test_widths_are_comma_separated() {
        let args = CliArgs::parse_from(["imageflight", "--widths", "64,32", "--cancel-every", "3"]);

        assert_eq!(args.workload.widths, vec![64, 32]);
        assert_eq!(args.workload.cancel_every, 3);
    }
}
