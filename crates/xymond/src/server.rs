//! Wire protocol listener.
//!
//! Clients connect over TCP, send one message, shut down their write
//! side and read the response. Everything stateful happens in the
//! control loop; this module only shuttles bytes.

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::daemon::ControlMsg;

/// Bind the protocol port and serve connections until the control
/// loop goes away.
pub async fn spawn_listener(
    listen: &str,
    max_msg_size: usize,
    control_tx: mpsc::Sender<ControlMsg>,
) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            let control_tx = control_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_connection(stream, peer.ip(), max_msg_size, control_tx).await
                {
                    debug!(%peer, error = %err, "connection error");
                }
            });
        }
    });
    Ok(())
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: std::net::IpAddr,
    max_msg_size: usize,
    control_tx: mpsc::Sender<ControlMsg>,
) -> Result<()> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if buf.len() + n > max_msg_size {
            let first_line = String::from_utf8_lossy(&buf)
                .lines()
                .next()
                .unwrap_or("")
                .to_string();
            warn!(%peer, limit = max_msg_size, first_line, "oversize message dropped");
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let msg = String::from_utf8_lossy(&buf).into_owned();
    if msg.trim().is_empty() {
        return Ok(());
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    control_tx
        .send(ControlMsg::Request {
            msg,
            sender: peer,
            reply: reply_tx,
        })
        .await
        .context("control loop gone")?;
    let response = reply_rx.await.context("control loop dropped the reply")?;
    if !response.is_empty() {
        stream.write_all(response.as_bytes()).await?;
    }
    stream.shutdown().await?;
    Ok(())
}
