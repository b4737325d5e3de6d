//! Control client for the xymond status daemon.
//!
//! Builds wire protocol messages from friendly subcommands, or
//! attaches to a broadcast channel in worker mode.

mod cli;
mod client;

use std::io::Read;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let addr = client::daemon_addr(cli.daemon.as_deref());

    let message = match &cli.command {
        Commands::Send { message } => match message {
            Some(m) => m.clone(),
            None => {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("reading message from stdin")?;
                buf
            }
        },
        Commands::Status {
            target,
            color,
            text,
            validity,
        } => {
            let command = match validity {
                Some(mins) => format!("status+{mins}"),
                None => "status".to_string(),
            };
            format!("{command} {target} {color} {}\n", text.join(" "))
        }
        Commands::Query { target } => format!("query {target}\n"),
        Commands::Board { filters } => format!("xymondboard {}\n", filters.join(" ")),
        Commands::Log { target } => format!("xymondlog {target}\n"),
        Commands::Disable {
            target,
            duration,
            reason,
        } => format!("disable {target} {duration} {}\n", reason.join(" ")),
        Commands::Enable { target } => format!("enable {target}\n"),
        Commands::Ack {
            cookie,
            duration,
            text,
        } => format!("xymondack {cookie} {duration} {}\n", text.join(" ")),
        Commands::Drop { host, test } => match test {
            Some(test) => format!("drop {host} {test}\n"),
            None => format!("drop {host}\n"),
        },
        Commands::Rename {
            host,
            first,
            second,
        } => match second {
            Some(newtest) => format!("rename {host} {first} {newtest}\n"),
            None => format!("rename {host} {first}\n"),
        },
        Commands::Ghosts => "ghostlist\n".to_string(),
        Commands::Ping => "ping\n".to_string(),
        Commands::Listen {
            channel,
            channel_dir,
        } => {
            return listen(channel, channel_dir).await;
        }
    };

    let response = client::send_message(&addr, &message).await?;
    if !response.is_empty() {
        print!("{response}");
    }
    Ok(())
}

/// Worker mode: attach to a channel socket and copy every record to
/// stdout until the daemon goes away.
async fn listen(channel: &str, channel_dir: &std::path::Path) -> Result<()> {
    let channel = xymon_common::ChannelName::parse(channel)
        .ok_or_else(|| anyhow!("unknown channel: {channel}"))?;
    let path = channel_dir.join(channel.as_str());
    let stream = tokio::net::UnixStream::connect(&path)
        .await
        .map_err(|e| anyhow!("cannot attach to {}: {e}", path.display()))?;
    let mut reader = BufReader::new(stream);
    let mut stdout = tokio::io::stdout();
    tokio::io::copy_buf(&mut reader, &mut stdout)
        .await
        .context("streaming channel records")?;
    stdout.flush().await?;
    Ok(())
}
