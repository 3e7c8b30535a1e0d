//! errfan - fan-in error collection driver
//!
//! Runs a simulated workload of concurrent error sources through the
//! collector and reports what came out of the merged stream.
//!
//! Exit codes:
//!   0 - Success (or errors collected without --fail-on-error)
//!   1 - Runtime error (bad arguments, unreadable config, etc.)
//!   2 - Errors collected and --fail-on-error set

mod cli;
mod config;
mod report;
mod workload;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{CollectConfig, Config, GeneralConfig, DEFAULT_CONFIG_FILE};
use errfan::{CancelSource, Cancellation, Collector};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use report::RunReport;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration before logging so the file can raise verbosity
    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(log_level(&args, &config.general));

    info!("errfan v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    debug!("Configuration: {:?}", config);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\nError: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .errfan.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("Created {} with default settings.", DEFAULT_CONFIG_FILE);
    Ok(())
}

/// Resolve the log level. `--quiet` wins over a verbose config file.
fn log_level(args: &Args, general: &GeneralConfig) -> tracing::Level {
    if general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    }
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the workload. Returns exit code (0 or 2).
async fn run(args: Args, config: Config) -> Result<i32> {
    if args.dry_run {
        return Ok(handle_dry_run(&config));
    }

    let specs = &config.workload.sources;
    let expected: usize = specs.iter().map(|s| s.expected_errors()).sum();
    info!(
        "Collecting from {} sources (expecting {} errors)",
        specs.len(),
        expected
    );

    let spinner = if args.quiet {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("waiting for errors...");
        Some(pb)
    };

    let started_at = Utc::now();
    let start = Instant::now();

    let mut merged = Collector::new()
        .buffer(config.collect.buffer)
        .cancellation(build_cancellation(&config.collect))
        .collect(workload::start_all(specs));

    let mut errors = Vec::new();
    while let Some(err) = merged.next().await {
        debug!("Collected: {}", err);
        errors.push(err);
        if let Some(ref pb) = spinner {
            pb.set_message(format!("{} errors collected", errors.len()));
        }
    }

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let duration = start.elapsed().as_secs_f64();
    let mut run_report = RunReport::new(started_at, duration, specs.len(), expected, &errors);

    if args.compare {
        info!("Running the same workload sequentially");
        let (sequential_errors, elapsed) = workload::run_sequential(specs).await;
        if sequential_errors.len() != run_report.source_errors && run_report.cancellation.is_none()
        {
            warn!(
                "Sequential run collected {} errors, concurrent run {}",
                sequential_errors.len(),
                run_report.source_errors
            );
        }
        run_report.sequential_seconds = Some(elapsed.as_secs_f64());
    }

    let output = match config.general.format {
        OutputFormat::Json => report::generate_json_report(&run_report)?,
        OutputFormat::Text => report::generate_text_report(&run_report),
    };
    println!("{}", output);

    if args.fail_on_error && run_report.total_errors() > 0 {
        eprintln!(
            "{} errors collected. Failing (exit code 2).",
            run_report.total_errors()
        );
        return Ok(2);
    }

    Ok(0)
}

/// Turn the collect settings into a cancellation bound.
fn build_cancellation(collect: &CollectConfig) -> Cancellation {
    let source = match (collect.timeout_ms, collect.pre_cancel) {
        (Some(timeout), _) => CancelSource::with_timeout(Duration::from_millis(timeout)),
        (None, true) => CancelSource::new(),
        (None, false) => return Cancellation::Unset,
    };

    if collect.pre_cancel {
        source.cancel();
    }

    Cancellation::from(&source)
}

/// Handle --dry-run: print the resolved workload and exit.
fn handle_dry_run(config: &Config) -> i32 {
    println!("Dry run: {} sources\n", config.workload.sources.len());

    for spec in &config.workload.sources {
        if spec.absent {
            println!("  {} (absent)", spec.name);
        } else {
            println!(
                "  {}: {}ms, {} errors, {} nils",
                spec.name, spec.delay_ms, spec.errors, spec.nils
            );
        }
    }

    match config.collect.timeout_ms {
        Some(timeout) => println!("\n  Timeout: {}ms", timeout),
        None => println!("\n  Timeout: none"),
    }
    if config.collect.pre_cancel {
        println!("  Cancellation fires before collection starts");
    }

    0
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is initialized, so problems go straight to stderr.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("Warning: failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}
