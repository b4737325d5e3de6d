//! TCP client for the daemon's wire protocol.
//!
//! One connection per message: connect, write, shut down the write
//! side, then read the response to EOF.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use xymon_common::DEFAULT_PORT;

/// Resolve the daemon address from the flag, the environment, or the
/// default port on localhost.
pub fn daemon_addr(explicit: Option<&str>) -> String {
    if let Some(addr) = explicit {
        return addr.to_string();
    }
    if let Ok(addr) = std::env::var("XYMOND_ADDR") {
        return addr;
    }
    format!("127.0.0.1:{DEFAULT_PORT}")
}

/// Send one message and return the daemon's response (empty for
/// fire-and-forget commands).
pub async fn send_message(addr: &str, message: &str) -> Result<String> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| anyhow!("cannot reach xymond at {addr}: {e}"))?;
    debug!("connected to {addr}, sending {} bytes", message.len());
    stream
        .write_all(message.as_bytes())
        .await
        .context("sending message")?;
    // EOF on our write side tells the daemon the message is complete
    stream.shutdown().await.context("closing write side")?;
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .context("reading response")?;
    Ok(response)
}
