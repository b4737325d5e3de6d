//! Xymon status daemon.
//!
//! Receives status reports over TCP, keeps the status board, and
//! broadcasts every state change to worker processes attached to the
//! channel sockets.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xymond::Daemon;
use xymon_common::config::{DaemonConfig, HostsConfig};

#[derive(Parser)]
#[command(name = "xymond")]
#[command(about = "Xymon network monitor status daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the daemon configuration file
    #[arg(long, default_value = "/etc/xymon/xymond.toml")]
    config: PathBuf,

    /// Listen address, overriding the configuration
    #[arg(long)]
    listen: Option<String>,

    /// Hosts file, overriding the configuration
    #[arg(long)]
    hosts: Option<PathBuf>,

    /// Checkpoint file, overriding the configuration
    #[arg(long)]
    checkpoint: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut cfg = DaemonConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }
    if let Some(hosts) = cli.hosts {
        cfg.hosts_file = hosts;
    }
    if let Some(checkpoint) = cli.checkpoint {
        cfg.checkpoint_file = checkpoint;
    }

    info!("xymond v{} starting", env!("CARGO_PKG_VERSION"));

    let hosts_cfg = if cfg.hosts_file.exists() {
        HostsConfig::load(&cfg.hosts_file)
            .with_context(|| format!("loading {}", cfg.hosts_file.display()))?
    } else {
        tracing::warn!(path = %cfg.hosts_file.display(), "hosts file missing, all reports will be ghosts");
        HostsConfig::default()
    };
    info!(hosts = hosts_cfg.len(), "hosts configuration loaded");

    let daemon = Daemon::new(cfg, hosts_cfg);
    daemon.run().await?;

    info!("shut down cleanly");
    Ok(())
}
