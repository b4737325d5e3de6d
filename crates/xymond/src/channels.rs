//! Channel broadcast subsystem.
//!
//! Nine logical buses fan out daemon events to worker processes. Each
//! channel is served on its own Unix socket; a worker attaches by
//! connecting. Delivery contract: a post is dropped when nobody is
//! attached, records carry a strictly increasing per-channel sequence
//! number, and a reader that has not drained the previous record
//! within the deadline has the new one skipped rather than stalling
//! the control loop.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use xymon_common::wire::{record_header, RECORD_END};
use xymon_common::ChannelName;

use crate::daemon::ControlMsg;

/// One formatted event waiting to be broadcast.
///
/// The tail holds the channel-specific fields (leading `|` included)
/// and any raw payload; the header with sequence number and timestamp
/// is stamped at post time. Formatting thus happens once per post, not
/// once per reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPost {
    pub channel: ChannelName,
    /// Usually the channel name; `notify` records ride the page
    /// channel under their own marker.
    pub marker: &'static str,
    pub hostname: String,
    pub sender: String,
    pub tail: String,
}

/// An attached worker: the bounded queue feeding its writer task.
/// Capacity 1 makes the queue itself the "previous record consumed"
/// gate.
#[derive(Debug)]
pub struct ReaderHandle {
    pub id: Uuid,
    pub tx: mpsc::Sender<Arc<str>>,
}

#[derive(Debug, Default)]
struct ChannelState {
    seq: u64,
    readers: Vec<ReaderHandle>,
    posted: u64,
    dropped: u64,
}

/// All nine channels plus their delivery bookkeeping. Owned and
/// mutated only by the control loop.
#[derive(Debug)]
pub struct ChannelHub {
    channels: HashMap<ChannelName, ChannelState>,
    drain_timeout: Duration,
}

impl ChannelHub {
    pub fn new(drain_timeout: Duration) -> Self {
        let mut channels = HashMap::new();
        for ch in ChannelName::ALL {
            channels.insert(ch, ChannelState::default());
        }
        Self {
            channels,
            drain_timeout,
        }
    }

    pub fn attach(&mut self, channel: ChannelName, handle: ReaderHandle) {
        info!(channel = %channel, reader = %handle.id, "worker attached");
        if let Some(state) = self.channels.get_mut(&channel) {
            state.readers.push(handle);
        }
    }

    pub fn detach(&mut self, channel: ChannelName, id: Uuid) {
        if let Some(state) = self.channels.get_mut(&channel) {
            let before = state.readers.len();
            state.readers.retain(|r| r.id != id);
            if state.readers.len() != before {
                info!(channel = %channel, reader = %id, "worker detached");
            }
        }
    }

    pub fn reader_count(&self, channel: ChannelName) -> usize {
        self.channels.get(&channel).map_or(0, |s| s.readers.len())
    }

    /// Sequence number of the last record posted on a channel.
    pub fn sequence(&self, channel: ChannelName) -> u64 {
        self.channels.get(&channel).map_or(0, |s| s.seq)
    }

    /// (posted, dropped) counters for the statistics report.
    pub fn counters(&self, channel: ChannelName) -> (u64, u64) {
        self.channels
            .get(&channel)
            .map_or((0, 0), |s| (s.posted, s.dropped))
    }

    /// Broadcast one record. Returns the number of readers that took
    /// it, or `None` when the post was dropped for lack of readers.
    pub async fn post(&mut self, post: ChannelPost, epoch_usec: (i64, u32)) -> Option<usize> {
        let Some(state) = self.channels.get_mut(&post.channel) else {
            return None;
        };
        if state.readers.is_empty() {
            // No backlog for disconnected workers.
            state.dropped += 1;
            debug!(channel = %post.channel, "no readers attached, post dropped");
            return None;
        }

        state.seq += 1;
        let record: Arc<str> = format!(
            "{}{}{}",
            record_header(post.marker, state.seq, &post.hostname, epoch_usec, &post.sender),
            post.tail,
            RECORD_END
        )
        .into();

        let mut delivered = 0;
        let mut gone: Vec<Uuid> = Vec::new();
        for reader in &state.readers {
            match tokio::time::timeout(self.drain_timeout, reader.tx.send(record.clone())).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) => gone.push(reader.id),
                Err(_) => {
                    warn!(
                        channel = %post.channel,
                        reader = %reader.id,
                        seq = state.seq,
                        "reader did not drain within deadline, record skipped"
                    );
                }
            }
        }
        state.readers.retain(|r| !gone.contains(&r.id));
        state.posted += 1;
        Some(delivered)
    }
}

/// Bind one Unix socket per channel and accept workers. Each accepted
/// connection registers a reader with the control loop and runs a
/// writer task until the worker goes away.
pub fn spawn_channel_listeners(dir: &Path, control_tx: mpsc::Sender<ControlMsg>) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating channel directory {}", dir.display()))?;
    for channel in ChannelName::ALL {
        let sock_path = dir.join(channel.as_str());
        if sock_path.exists() {
            std::fs::remove_file(&sock_path)
                .with_context(|| format!("removing stale socket {}", sock_path.display()))?;
        }
        let listener = UnixListener::bind(&sock_path)
            .with_context(|| format!("binding channel socket {}", sock_path.display()))?;
        info!(channel = %channel, path = %sock_path.display(), "channel socket ready");

        let control_tx = control_tx.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(channel = %channel, error = %err, "channel accept failed");
                        continue;
                    }
                };
                let id = Uuid::new_v4();
                let (tx, mut rx) = mpsc::channel::<Arc<str>>(1);
                if control_tx
                    .send(ControlMsg::ChannelAttach {
                        channel,
                        handle: ReaderHandle { id, tx },
                    })
                    .await
                    .is_err()
                {
                    return; // daemon shutting down
                }
                let control_tx = control_tx.clone();
                tokio::spawn(async move {
                    let mut stream = stream;
                    while let Some(record) = rx.recv().await {
                        if stream.write_all(record.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    let _ = control_tx.send(ControlMsg::ChannelDetach { channel, id }).await;
                });
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_for(channel: ChannelName) -> ChannelPost {
        ChannelPost {
            channel,
            marker: channel.as_str(),
            hostname: "myhost".to_string(),
            sender: "10.0.0.1".to_string(),
            tail: "|field1|field2".to_string(),
        }
    }

    #[tokio::test]
    async fn test_post_without_readers_is_dropped() {
        let mut hub = ChannelHub::new(Duration::from_millis(50));
        let res = hub.post(post_for(ChannelName::Status), (100, 0)).await;
        assert_eq!(res, None);
        assert_eq!(hub.sequence(ChannelName::Status), 0);
        assert_eq!(hub.counters(ChannelName::Status), (0, 1));
    }

    #[tokio::test]
    async fn test_sequence_is_gapless_and_fifo() {
        let mut hub = ChannelHub::new(Duration::from_millis(200));
        let (tx, mut rx) = mpsc::channel::<Arc<str>>(1);
        hub.attach(
            ChannelName::Stachg,
            ReaderHandle {
                id: Uuid::new_v4(),
                tx,
            },
        );

        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(rec) = rx.recv().await {
                let seq: u64 = rec
                    .split('#')
                    .nth(1)
                    .and_then(|s| s.split('/').next())
                    .and_then(|s| s.parse().ok())
                    .unwrap();
                seen.push(seq);
                if seen.len() == 3 {
                    break;
                }
            }
            seen
        });

        for i in 0..3 {
            let res = hub.post(post_for(ChannelName::Stachg), (1000 + i, 0)).await;
            assert_eq!(res, Some(1));
        }
        let seen = reader.await.unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_slow_reader_skipped_not_blocking() {
        let mut hub = ChannelHub::new(Duration::from_millis(20));
        let (tx, _rx) = mpsc::channel::<Arc<str>>(1);
        hub.attach(
            ChannelName::Page,
            ReaderHandle {
                id: Uuid::new_v4(),
                tx,
            },
        );
        // first fills the queue; nobody consumes
        assert_eq!(hub.post(post_for(ChannelName::Page), (1, 0)).await, Some(1));
        // second hits the deadline and is skipped for this reader
        assert_eq!(hub.post(post_for(ChannelName::Page), (2, 0)).await, Some(0));
        // sequence still advanced for both posts
        assert_eq!(hub.sequence(ChannelName::Page), 2);
    }

    #[tokio::test]
    async fn test_closed_reader_detached() {
        let mut hub = ChannelHub::new(Duration::from_millis(20));
        let (tx, rx) = mpsc::channel::<Arc<str>>(1);
        drop(rx);
        hub.attach(
            ChannelName::Data,
            ReaderHandle {
                id: Uuid::new_v4(),
                tx,
            },
        );
        assert_eq!(hub.post(post_for(ChannelName::Data), (1, 0)).await, Some(0));
        assert_eq!(hub.reader_count(ChannelName::Data), 0);
    }

    #[test]
    fn test_record_shape() {
        let rec = format!(
            "{}{}{}",
            record_header("status", 7, "db01", (1700000000, 42), "10.1.1.1"),
            "|origin|db01|disk",
            RECORD_END
        );
        assert!(rec.starts_with("@@status#7/db01|1700000000.000042|10.1.1.1|origin"));
        assert!(rec.ends_with("\n@@\n"));
    }
}
