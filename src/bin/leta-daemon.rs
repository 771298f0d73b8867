//! leta daemon entry point.
//!
//! Runs the IPC accept loop in the foreground; the CLI spawns this
//! binary detached. Logs go to `<cache>/log/daemon.log`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leta::config::Config;
use leta::daemon::Daemon;
use leta::paths;

/// Long-lived daemon behind the leta CLI.
#[derive(Parser, Debug)]
#[command(name = "leta-daemon", version, about)]
struct Args {
    /// Log to stderr instead of the daemon log file.
    #[arg(long)]
    foreground_log: bool,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(args: &Args, config: &Config) -> Result<()> {
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("leta={level},leta_daemon={level}")));

    if args.foreground_log {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .ok();
        return Ok(());
    }

    paths::ensure_dirs()?;
    let log_path = paths::log_dir()?.join("daemon.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("cannot open {}", log_path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .try_init()
        .ok();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load().context("loading configuration")?;
    init_tracing(&args, &config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting");
    let daemon = Arc::new(Daemon::new(config).context("creating daemon")?);
    daemon.run().await.context("daemon loop")?;
    info!("exited cleanly");
    Ok(())
}
