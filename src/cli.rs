//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// errfan - merge errors from many concurrent sources into one stream
///
/// Runs a simulated workload of error-producing sources through the
/// fan-in collector, optionally bounded by a timeout, and reports every
/// error that came out of the merged stream.
///
/// Examples:
///   errfan --sources 5 --delay-ms 50
///   errfan --sources 3 --delay-ms 1000 --errors 1 --timeout-ms 200
///   errfan --config workload.toml --format json
///   errfan --sources 5 --compare
///   errfan --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .errfan.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Replace the configured workload with this many identical sources
    #[arg(short, long, value_name = "COUNT")]
    pub sources: Option<usize>,

    /// How long each source works before reporting, in milliseconds
    #[arg(long, value_name = "MS")]
    pub delay_ms: Option<u64>,

    /// Number of errors each source reports
    #[arg(short, long, value_name = "COUNT")]
    pub errors: Option<u32>,

    /// Bound the collection by a deadline, in milliseconds
    #[arg(short, long, value_name = "MS", env = "ERRFAN_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Fire the cancellation before collection starts
    #[arg(long)]
    pub pre_cancel: bool,

    /// Capacity of the merged stream's channel
    #[arg(long, value_name = "SLOTS")]
    pub buffer: Option<usize>,

    /// Output format (text, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Also run the workload sequentially and compare timings
    #[arg(long)]
    pub compare: bool,

    /// Exit with code 2 if any error was collected
    ///
    /// Useful for CI pipelines.
    #[arg(long)]
    pub fail_on_error: bool,

    /// Print the resolved workload without running it
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .errfan.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the run report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain text (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout_ms {
            if timeout == 0 {
                return Err("Timeout must be at least 1 millisecond".to_string());
            }
        }

        if self.buffer == Some(0) {
            return Err("Buffer must be at least 1".to_string());
        }

        if let Some(ref config_path) = self.config {
            if !config_path.is_file() {
                return Err(format!(
                    "Config file does not exist: {}",
                    config_path.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
