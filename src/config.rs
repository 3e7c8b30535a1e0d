//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.errfan.toml` files.

use crate::cli::OutputFormat;
use crate::workload::{default_delay_ms, SourceSpec};
use anyhow::{Context, Result};
use errfan::DEFAULT_BUFFER;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".errfan.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Collection settings.
    #[serde(default)]
    pub collect: CollectConfig,

    /// Simulated workload.
    #[serde(default)]
    pub workload: WorkloadConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Report format.
    #[serde(default)]
    pub format: OutputFormat,
}

/// How the collection is bounded and buffered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectConfig {
    /// Deadline for the whole collection, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Capacity of the merged stream's channel.
    #[serde(default = "default_buffer")]
    pub buffer: usize,

    /// Fire the cancellation before the collection starts.
    #[serde(default)]
    pub pre_cancel: bool,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            buffer: default_buffer(),
            pre_cancel: false,
        }
    }
}

fn default_buffer() -> usize {
    DEFAULT_BUFFER
}

/// The sources to simulate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            sources: SourceSpec::uniform(5, default_delay_ms(), 0),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Only values the user actually passed override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        // --sources replaces the workload; otherwise delay/errors reshape it
        if let Some(count) = args.sources {
            let delay = args.delay_ms.unwrap_or_else(default_delay_ms);
            let errors = args.errors.unwrap_or(0);
            self.workload.sources = SourceSpec::uniform(count, delay, errors);
        } else {
            for source in &mut self.workload.sources {
                if let Some(delay) = args.delay_ms {
                    source.delay_ms = delay;
                }
                if let Some(errors) = args.errors {
                    source.errors = errors;
                }
            }
        }

        if let Some(timeout) = args.timeout_ms {
            self.collect.timeout_ms = Some(timeout);
        }
        if let Some(buffer) = args.buffer {
            self.collect.buffer = buffer;
        }
        if args.pre_cancel {
            self.collect.pre_cancel = true;
        }

        if let Some(format) = args.format {
            self.general.format = format;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
