//! CLI argument definitions

use clap::Parser;

use crate::buffer::DEFAULT_ENTRIES;
use crate::profiler::SessionSettings;

#[derive(Parser, Debug)]
#[command(
    name = "haltprof",
    about = "Sample synthetic workload threads by suspending them",
    after_help = "\
EXAMPLES:
    haltprof                                 4 threads, 1ms interval, 5 seconds
    haltprof --interval 0.5 --memory         Sub-millisecond request (rounds to 1ms)
    haltprof --threads 8 --filter busy       Profile only the busy workers
    haltprof --duration 0 --json             Run until Ctrl+C, print JSON"
)]
pub struct Args {
    /// Sampling interval in milliseconds (rounded, at least 1)
    #[arg(short, long, default_value_t = 1.0)]
    pub interval: f64,

    /// Sample buffer capacity
    #[arg(short, long, default_value_t = DEFAULT_ENTRIES)]
    pub entries: usize,

    /// Attach process memory to the first sample of every iteration
    #[arg(short, long)]
    pub memory: bool,

    /// Profile only threads whose name contains FILTER (repeatable)
    #[arg(short, long, value_name = "FILTER")]
    pub filter: Vec<String>,

    /// Number of workload threads to spawn
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub threads: u16,

    /// Stop after N seconds (0 = until Ctrl+C)
    #[arg(short, long, default_value_t = 5)]
    pub duration: u64,

    /// Print the session report as JSON
    #[arg(long)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            interval_ms: self.interval,
            entries: self.entries,
            memory: self.memory,
            filters: self.filter.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["haltprof"]);
        assert!((args.interval - 1.0).abs() < f64::EPSILON);
        assert_eq!(args.entries, DEFAULT_ENTRIES);
        assert_eq!(args.threads, 4);
        assert_eq!(args.duration, 5);
        assert!(!args.memory && !args.json);
    }

    #[test]
    fn test_repeated_filters_feed_settings() {
        let args = Args::parse_from(["haltprof", "-f", "busy", "--filter", "sleepy", "--memory"]);
        let settings = args.session_settings();
        assert_eq!(settings.filters, ["busy", "sleepy"]);
        assert!(settings.memory);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(Args::try_parse_from(["haltprof", "--threads", "0"]).is_err());
    }
}
