//! disclaimer-sync - keep license/disclaimer blocks current across a source tree
//!
//! Main entry point for the CLI.
//!
//! # Overview
//!
//! The binary wires the library together:
//! - Logging infrastructure (console + optional rotating file)
//! - Configuration loading ([`ConfigManager`])
//! - Rule set construction ([`BlockRegistry`])
//! - Tokio multi-thread runtime driving the [`TreeWalker`]
//!
//! # Execution Flow
//!
//! 1. Parse CLI arguments and initialize logging
//! 2. Load the JSON/YAML config, resolving relative paths against its directory
//! 3. Read every comment block file into an immutable `RuleSet` (fatal on error)
//! 4. Walk the root directory, updating matching files concurrently
//! 5. Wait for every dispatched update, then log the summary and per-file failures
//!
//! Ctrl-C cancels the run: no new files are dispatched, running updates finish.

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use disclaimer_sync::{
    APP_NAME, BlockRegistry, ConfigManager, DisclaimerConfig, Metrics, RunReport, TreeWalker,
    VERSION, WalkOptions,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(name = "disclaimer-sync", version, about)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Also write daily-rotated log files to this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replace the disclaimer block in every matching file under the root directory
    Run {
        /// Configuration file (.json, .yaml or .yml)
        #[arg(short, long, default_value = "config.json")]
        config: Utf8PathBuf,

        /// Override the configured root directory
        #[arg(long, value_name = "DIR")]
        root: Option<Utf8PathBuf>,

        /// Maximum number of files updated concurrently
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Per-file timeout in seconds (0 disables it)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Exit with a failure status when any file could not be updated
        #[arg(long)]
        strict: bool,
    },

    /// Write a starter configuration file
    Init {
        /// Where to write the configuration (.json, .yaml or .yml)
        #[arg(short, long, default_value = "config.json")]
        config: Utf8PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let _log_guard = disclaimer_sync::logging::setup_logging(
        cli.log_dir.as_deref(),
        APP_NAME,
        cli.debug,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    match cli.command {
        Command::Init { config } => {
            init_config(config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            config,
            root,
            jobs,
            timeout,
            strict,
        } => run(config, root, jobs, timeout, strict),
    }
}

fn init_config(path: Utf8PathBuf) -> Result<()> {
    if path.exists() {
        bail!("Refusing to overwrite existing config file {}", path);
    }

    ConfigManager::new(&path)?.save(&DisclaimerConfig::example())?;
    tracing::info!("Wrote starter config to {}", path);
    Ok(())
}

fn run(
    config_path: Utf8PathBuf,
    root_override: Option<Utf8PathBuf>,
    jobs: Option<usize>,
    timeout_secs: Option<u64>,
    strict: bool,
) -> Result<ExitCode> {
    let config_manager = ConfigManager::new(&config_path)?;
    let mut config = config_manager.load()?;

    if let Some(jobs) = jobs {
        config.settings.max_concurrency = jobs;
    }
    if let Some(secs) = timeout_secs {
        config.settings.task_timeout_secs = secs;
    }
    let root = root_override.unwrap_or_else(|| config.root_directory_to_search.clone());

    // Every block file is read before any source file is touched
    let rules = BlockRegistry::load(&ConfigManager::to_rule_specs(&config))
        .context("Failed to load comment blocks")?;

    let options = WalkOptions::from(&config.settings);
    let worker_threads = options.max_concurrency.clamp(1, 16);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(worker_threads)
        .thread_name("disclaimer-worker")
        .build()?;

    tracing::info!(
        "Tokio runtime initialized with {} worker threads",
        worker_threads
    );

    let metrics = Arc::new(Metrics::new());
    let walker = TreeWalker::new(Arc::new(rules), options).with_metrics(Arc::clone(&metrics));

    let result = runtime.block_on(async {
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received - cancelling outstanding updates...");
                let _ = cancel_tx.send(true);
            }
        });

        walker.run(&root, cancel_rx).await
    });

    runtime.shutdown_timeout(Duration::from_secs(5));
    metrics.log_summary();

    if let Some(partial) = result.as_ref().err().and_then(|e| e.partial_report()) {
        log_failures(partial);
        tracing::error!("Stopped early: {}", partial.summary());
    }
    let report = result.with_context(|| format!("Failed to update files under {}", root))?;

    log_failures(&report);
    if report.interrupted {
        tracing::warn!(
            "Run was interrupted; {} files were not processed",
            report.cancelled.len()
        );
    }
    tracing::info!("Done: {}", report.summary());

    if strict && report.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn log_failures(report: &RunReport) {
    for failure in &report.failures {
        tracing::error!("FAILED {}: {}", failure.path, failure.message);
    }
}
