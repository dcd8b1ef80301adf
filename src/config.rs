//! Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use http_collator::{CollatorConfig, DEFAULT_MAX_BUFFER_SIZE, ExtractorConfig};

use crate::sink::SinkFormat;
use crate::source::ReplayInput;

/// Default location of the trace output
pub const DEFAULT_OUTPUT: &str = "/traces/http-trace.txt";

#[derive(Debug, Parser)]
#[command(name = "http-tracer")]
#[command(about = "Reconstructs HTTP/1.x transactions from syscall capture records", long_about = None)]
pub struct Cli {
    /// Where finished transactions are written
    #[arg(short, long, env = "OUTPUT_FILE", default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Replay capture records from this file instead of stdin
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = SinkFormat::Text)]
    pub format: SinkFormat,

    /// Sweep idle connections every this many events (0 disables)
    #[arg(long, default_value_t = 1000)]
    pub eviction_interval: u64,

    /// Close connections idle for this many seconds (0 disables)
    #[arg(long, default_value_t = 30)]
    pub idle_timeout_secs: u64,

    /// Per-direction buffer cap in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BUFFER_SIZE)]
    pub max_buffer_size: usize,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct TracerConfig {
    pub output:   PathBuf,
    pub input:    ReplayInput,
    pub format:   SinkFormat,
    pub collator: CollatorConfig,
    pub verbose:  bool,
}

impl From<Cli> for TracerConfig {
    fn from(cli: Cli) -> Self {
        let idle_timeout = (cli.idle_timeout_secs > 0).then(|| Duration::from_secs(cli.idle_timeout_secs));
        Self {
            output:   cli.output,
            input:    cli.input.map_or(ReplayInput::Stdin, ReplayInput::File),
            format:   cli.format,
            collator: CollatorConfig {
                eviction_interval: cli.eviction_interval,
                idle_timeout,
                max_buffer_size: cli.max_buffer_size,
                extractor: ExtractorConfig::default(),
            },
            verbose:  cli.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["http-tracer"]).unwrap();
        let config = TracerConfig::from(cli);

        // OUTPUT_FILE may be set in the test environment
        if std::env::var_os("OUTPUT_FILE").is_none() {
            assert_eq!(config.output, PathBuf::from(DEFAULT_OUTPUT));
        }
        assert!(matches!(config.input, ReplayInput::Stdin));
        assert_eq!(config.format, SinkFormat::Text);
        assert_eq!(config.collator.eviction_interval, 1000);
        assert_eq!(config.collator.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.collator.max_buffer_size, DEFAULT_MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "http-tracer",
            "--output",
            "/tmp/out.jsonl",
            "--input",
            "capture.bin",
            "--format",
            "json",
            "--idle-timeout-secs",
            "0",
            "--eviction-interval",
            "50",
            "-v",
        ])
        .unwrap();
        let config = TracerConfig::from(cli);

        assert_eq!(config.output, PathBuf::from("/tmp/out.jsonl"));
        assert!(matches!(config.input, ReplayInput::File(ref p) if p == &PathBuf::from("capture.bin")));
        assert_eq!(config.format, SinkFormat::Json);
        assert_eq!(config.collator.idle_timeout, None);
        assert_eq!(config.collator.eviction_interval, 50);
        assert!(config.verbose);
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["http-tracer", "--format", "xml"]).is_err());
    }
}
