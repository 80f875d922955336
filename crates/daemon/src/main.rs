//! Autotriggers daemon
//!
//! Non-interactive front end over the trigger engine: loads the rule file,
//! starts the hotplug monitor, renders engine log lines to stdout and stops
//! cleanly on Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use engine::{Engine, setup_logging};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "autotriggers")]
#[command(
    author,
    version,
    about = "Run operator-defined scripts when matching USB devices are attached"
)]
struct Args {
    /// Path to the JSON rule file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also run the rules against devices that are already attached
    #[arg(long)]
    scan: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level).context("failed to setup logging")?;

    let config_path = args.config.unwrap_or_else(default_config_path);
    info!("autotriggers v{}", env!("CARGO_PKG_VERSION"));
    info!("rule file: {}", config_path.display());

    if !nix::unistd::geteuid().is_root() {
        warn!("not running as root; device attributes or scripts may be inaccessible");
    }

    let (engine, log_rx) = Engine::new(config_path);
    let printer = tokio::spawn(async move {
        while let Ok(line) = log_rx.recv().await {
            println!("{line}");
        }
    });

    // A missing or malformed rule file is reported, not fatal: the monitor
    // re-reads it on every event, so rules can be fixed while running.
    let _ = engine.load_config().await;

    engine
        .start_monitor()
        .await
        .context("failed to start USB monitoring")?;

    if args.scan && engine.scan_existing_devices().await.is_err() {
        warn!("existing-device scan failed, continuing with live events only");
    }

    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    engine.stop_monitor().await;
    drop(engine);
    let _ = printer.await;

    Ok(())
}

fn default_config_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        config_dir.join("autotriggers").join("triggers.json")
    } else {
        PathBuf::from("/etc/autotriggers/triggers.json")
    }
}
