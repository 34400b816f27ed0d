//! # shm_handoff Binary
//!
//! Runs one parent/child handoff over a named shared memory region and
//! prints the value the child wrote.
//!
//! # Usage
//!
//! ```bash
//! # Baseline run
//! shm_handoff
//!
//! # Custom region name, bounded wait, verbose logging
//! shm_handoff --name /my_region --timeout-ms 2000 -v
//!
//! # Settings from a file
//! shm_handoff --config handoff.toml --json
//! ```
//!
//! Exit status is 0 on success and 1 on any failure.

#![deny(warnings)]

use clap::Parser;
use handoff_common::config::{ConfigError, ConfigLoader, HandoffConfig, LogLevel};
use shm_handoff::{Handoff, init_tracing, tracing_level};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, error, info, warn};

/// Parent/child value handoff over POSIX shared memory
#[derive(Parser, Debug)]
#[command(name = "shm_handoff")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Parent/child value handoff over a named POSIX shared memory region")]
#[command(long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Shared memory object name (overrides region.name)
    #[arg(short, long)]
    name: Option<String>,

    /// Bound the wait for the child, in milliseconds (overrides wait.timeout_ms)
    #[arg(short, long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            setup_tracing(&args, LogLevel::default());
            error!("Configuration rejected: {e}");
            return ExitCode::FAILURE;
        }
    };

    setup_tracing(&args, config.shared.log_level);
    info!(
        service = %config.shared.service_name,
        "shm_handoff v{} starting", env!("CARGO_PKG_VERSION")
    );

    let mut handoff = Handoff::new(config);
    match handoff.run() {
        Ok(report) => {
            println!("{report}");
            if !report.release.is_clean() {
                warn!(
                    "Region teardown incomplete: {} step(s) failed",
                    report.release.failures.len()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(failed_after = ?handoff.failed_at(), "Handoff failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Build the effective configuration: defaults, then file, then CLI flags.
fn load_config(args: &Args) -> Result<HandoffConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => HandoffConfig::load(path)?,
        None => HandoffConfig::default(),
    };

    if let Some(name) = &args.name {
        config.region.name = name.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.wait.timeout_ms = Some(timeout_ms);
    }

    config.validate()?;
    Ok(config)
}

/// Setup tracing subscriber based on CLI arguments and configured level.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        tracing_level(configured)
    };
    init_tracing(level, args.json);
}
