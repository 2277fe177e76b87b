//! scanward - recurring vulnerability scans through the OMP client
//!
//! One invocation is one run:
//! - Load saved hosts and static job definitions
//! - Optionally sweep a subnet for new hosts
//! - Reconcile with the scanner and create missing targets and tasks
//! - Optionally start the next due scan
//! - Retire stale hosts and save
//!
//! Exit codes: 0 done, 1 snapshot not saved, 2 configuration error, 3 saved
//! hosts unreadable, 4 authentication failed, 6 no scanner socket, 65
//! malformed scanner output, 66 scanner unreachable, 70 scanner timeout.

mod cli;
mod config;
mod discovery;
mod execution;
mod omp;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use scanward_core::{load_jobs, CycleOptions, Engine, EngineError, JobError, JsonSnapshotStore};

use cli::Cli;
use config::AgentConfig;
use discovery::NetworkDiscovery;
use omp::OmpScanner;

const CONFIG_ERROR: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { CONFIG_ERROR } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    // Initialize logging, RUST_LOG wins over -v
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .init();

    info!("scanward {} starting", env!("CARGO_PKG_VERSION"));

    match run(&cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(cli: &Cli) -> Result<u8> {
    let config_path = AgentConfig::resolve_path(cli.config.as_deref());
    let config = AgentConfig::load(&config_path)
        .await
        .context("Failed to load configuration")?;
    debug!("Using {}: {:?}", config_path.display(), config);

    let jobs = match load_jobs(&config.paths.job_source) {
        Ok(jobs) => jobs,
        Err(JobError::InvalidPath(path)) => {
            warn!(source = %path.display(), "job source not found, continuing without jobs");
            Vec::new()
        }
        Err(e) => return Err(e).context("Failed to read job definitions"),
    };
    info!(jobs = jobs.len(), "job definitions loaded");

    let scanner = OmpScanner::new(config.omp_settings());
    let discovery = NetworkDiscovery::new(
        config.discovery.nmap_binary.clone(),
        config.discovery.arping_binary.clone(),
        Duration::from_secs(config.discovery.timeout_secs),
    );
    let store = JsonSnapshotStore::new(&config.paths.data_file);

    let engine = Engine::new(&scanner, &discovery, &store)
        .with_links(config.result_links())
        .with_settings(config.scheduler_settings(cli.verify))
        .with_retention(config.retention_policy());
    let options = CycleOptions {
        subnet: cli.scan.clone(),
        run_scan: cli.run,
    };

    let report = engine
        .run_cycle(&jobs, &options, Utc::now())
        .await
        .context("Run aborted")?;

    if !report.retention.removed.is_empty() {
        info!(removed = report.retention.removed.len(), "stale hosts removed");
    }
    Ok(if report.saved { 0 } else { 1 })
}

/// Engine errors carry their own code; anything else is a setup problem
fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<EngineError>()
        .map(EngineError::exit_code)
        .unwrap_or(CONFIG_ERROR)
}
