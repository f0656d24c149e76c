//! rtos-bench runner.
//!
//! Runs the benchmark once against the simulated kernel, writes the report
//! to stdout, then parks in the final run state until SIGINT or SIGTERM.

mod signals;

use anyhow::{Context, Result};
use bench_common::config::BenchConfig;
use bench_harness::{HaltingFaultHandler, Harness, LineReporter, Reporter};
use bench_kernel::SimKernel;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::signals::{wait_for_shutdown, SignalHandler};

/// Environment variable naming a configuration file.
const CONFIG_ENV: &str = "RTOS_BENCH_CONFIG";

/// Configuration file used during local development.
const LOCAL_CONFIG: &str = "config/default.toml";

/// rtos-bench command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rtos-bench",
    about = "RTOS micro-benchmarks - task lifecycle, context switch and mutex latency in cycles",
    version,
    long_about = None
)]
struct Args {
    /// Path to a benchmark configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rtos-bench");

    let config = load_config(&args)?;
    info!(
        stack_size = config.lifecycle.stack_size,
        tick_period = ?config.kernel.tick_period,
        cpu_affinity = ?config.kernel.cpu_affinity,
        sweep = config.sweep.enabled,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let reporter: Arc<dyn Reporter> = Arc::new(LineReporter::stdout());
    let fault_handler = Arc::new(HaltingFaultHandler::with_reporter(Arc::clone(&reporter)));
    let kernel = Arc::new(SimKernel::new(config.kernel.clone(), fault_handler));

    let summary = Harness::new(kernel, config, reporter).run();
    match serde_json::to_string(&summary) {
        Ok(json) => debug!(summary = %json, "Run summary"),
        Err(e) => warn!(error = %e, "Failed to serialize run summary"),
    }

    if let Some(err) = &summary.error {
        error!(error = %err, "Run halted");
    }
    info!(state = %summary.state, "Parked until SIGINT or SIGTERM");

    while !wait_for_shutdown(&signal_handler, Duration::from_secs(1)) {}

    info!(
        signals = signal_handler.state().signal_count(),
        "Shutting down"
    );
    Ok(if summary.halted() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Initialize logging to stderr; stdout carries the report.
fn init_logging(level: &str) {
    let filter = format!(
        "rtos_bench={level},bench_harness={level},bench_kernel={level},bench_common={level}"
    );

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RTOS_BENCH_CONFIG` environment variable
/// 3. `config/default.toml` (local development)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<BenchConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return BenchConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {CONFIG_ENV}");
            return BenchConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {CONFIG_ENV}={env_path:?}"));
        }
        warn!(
            path = %env_path,
            "{CONFIG_ENV} set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from(LOCAL_CONFIG);
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return BenchConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(BenchConfig::default())
}
