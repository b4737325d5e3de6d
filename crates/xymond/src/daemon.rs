//! Daemon control loop.
//!
//! A single task owns the state engine, the channel hub and the
//! scheduler. Listener tasks hand work in over a message channel, so
//! no locking is needed around the engine.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use xymon_common::config::{DaemonConfig, HostsConfig};
use xymon_common::ChannelName;

use crate::channels::{spawn_channel_listeners, ChannelHub, ReaderHandle};
use crate::checkpoint;
use crate::dispatcher;
use crate::engine::Engine;
use crate::server;
use crate::sweep;

/// Messages into the control loop.
pub enum ControlMsg {
    /// One wire protocol message from a network client.
    Request {
        msg: String,
        sender: IpAddr,
        reply: oneshot::Sender<String>,
    },
    /// A worker connected to a channel socket.
    ChannelAttach {
        channel: ChannelName,
        handle: ReaderHandle,
    },
    /// A worker went away.
    ChannelDetach { channel: ChannelName, id: Uuid },
}

/// A command queued by `schedule` for later execution.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: u64,
    pub execution_time: i64,
    pub sender: String,
    pub command: String,
}

/// Per-command message counters, reported in the self status.
#[derive(Debug, Default)]
pub struct Counters {
    pub total: u64,
    pub per_command: HashMap<String, u64>,
}

impl Counters {
    pub fn bump(&mut self, command: &str) {
        self.total += 1;
        *self.per_command.entry(command.to_string()).or_insert(0) += 1;
    }
}

pub struct Daemon {
    pub engine: Engine,
    pub hub: ChannelHub,
    pub scheduler: Vec<ScheduledTask>,
    pub next_task_id: u64,
    pub filecache: HashMap<PathBuf, String>,
    pub counters: Counters,
    pub started: i64,
    last_checkpoint: i64,
    last_sweep: i64,
    last_stats: i64,
}

impl Daemon {
    pub fn new(cfg: DaemonConfig, hosts_cfg: HostsConfig) -> Self {
        let now = Utc::now().timestamp();
        let drain = Duration::from_millis(cfg.channel_drain_timeout_ms);
        Daemon {
            engine: Engine::new(cfg, hosts_cfg),
            hub: ChannelHub::new(drain),
            scheduler: Vec::new(),
            next_task_id: 1,
            filecache: HashMap::new(),
            counters: Counters::default(),
            started: now,
            last_checkpoint: now,
            last_sweep: now,
            last_stats: now,
        }
    }

    /// Process one wire message and broadcast whatever it produced.
    pub async fn handle_message(&mut self, msg: &str, sender: IpAddr, now: i64) -> Option<String> {
        let reply = dispatcher::dispatch(self, msg, sender, now);
        self.flush_posts().await;
        reply
    }

    /// Push everything the engine queued onto the channel sockets.
    pub async fn flush_posts(&mut self) {
        let posts = self.engine.drain_posts();
        for post in posts {
            let ts = Utc::now();
            let stamp = (ts.timestamp(), ts.timestamp_subsec_micros());
            self.hub.post(post, stamp).await;
        }
    }

    /// Run scheduled tasks whose time has come, feeding them back
    /// through the normal dispatch path.
    async fn run_scheduler(&mut self, now: i64) {
        while let Some(task) = self.scheduler.first() {
            if task.execution_time > now {
                break;
            }
            let task = self.scheduler.remove(0);
            let sender: IpAddr = task
                .sender
                .parse()
                .unwrap_or_else(|_| IpAddr::from([127, 0, 0, 1]));
            info!(id = task.id, command = %task.command.lines().next().unwrap_or(""), "running scheduled task");
            self.handle_message(&task.command, sender, now).await;
        }
    }

    async fn housekeeping(&mut self, now: i64) {
        self.run_scheduler(now).await;

        if now - self.last_sweep >= self.engine.cfg.purple_sweep_secs as i64 {
            self.last_sweep = now;
            sweep::check_purple(&mut self.engine, now);
            self.engine.expire_ghosts(now);
            self.flush_posts().await;
        }

        if now - self.last_stats >= self.engine.cfg.stats_interval_secs as i64 {
            self.last_stats = now;
            let msg = sweep::stats_message(self, now);
            let sender = self.engine.cfg.self_hostname.clone();
            if let Err(err) = self.engine.apply_status(crate::engine::StatusArgs {
                now,
                sender: &sender,
                origin: "xymond",
                hostname: &sender,
                testname: "xymond",
                color: xymon_common::Color::Green,
                validity_mins: self.engine.cfg.default_validity_mins,
                grouplist: None,
                downtime_cause: None,
                modify_only: false,
                summary: false,
                message: msg,
            }) {
                warn!(error = %err, "self status rejected");
            }
            self.flush_posts().await;
        }

        if now - self.last_checkpoint >= self.engine.cfg.checkpoint_interval_secs as i64 {
            self.last_checkpoint = now;
            // snapshot on the loop, write off it
            let rendered = checkpoint::render(&self.engine, &self.scheduler);
            let path = self.engine.cfg.checkpoint_file.clone();
            let logs = self.engine.logs.len();
            tokio::task::spawn_blocking(move || {
                checkpoint_to_disk(&path, &rendered, logs);
            });
        }
    }

    /// Render and write the checkpoint on the spot (shutdown path).
    fn write_checkpoint(&self) {
        let rendered = checkpoint::render(&self.engine, &self.scheduler);
        checkpoint_to_disk(
            &self.engine.cfg.checkpoint_file,
            &rendered,
            self.engine.logs.len(),
        );
    }

    /// Load the previous checkpoint if one exists.
    pub fn restore_checkpoint(&mut self) {
        let path = self.engine.cfg.checkpoint_file.clone();
        if !path.exists() {
            info!(path = %path.display(), "no checkpoint, starting empty");
            return;
        }
        match checkpoint::restore(&mut self.engine, &mut self.scheduler, &path) {
            Ok(count) => {
                self.next_task_id = self
                    .scheduler
                    .iter()
                    .map(|t| t.id + 1)
                    .max()
                    .unwrap_or(self.next_task_id);
                info!(logs = count, path = %path.display(), "checkpoint restored");
            }
            Err(err) => warn!(path = %path.display(), error = %err, "checkpoint unusable, starting empty"),
        }
    }

    /// Main loop. Returns when the process is asked to stop.
    pub async fn run(mut self) -> Result<()> {
        self.restore_checkpoint();

        let (tx, mut rx) = mpsc::channel::<ControlMsg>(256);
        spawn_channel_listeners(&self.engine.cfg.channel_dir, tx.clone())
            .context("creating channel sockets")?;
        server::spawn_listener(&self.engine.cfg.listen, self.engine.cfg.max_msg_size, tx)
            .await
            .context("binding wire protocol listener")?;

        let mut tick = tokio::time::interval(Duration::from_secs(2));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(listen = %self.engine.cfg.listen, "daemon running");
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        ControlMsg::Request { msg, sender, reply } => {
                            let now = Utc::now().timestamp();
                            let response = self.handle_message(&msg, sender, now).await;
                            let _ = reply.send(response.unwrap_or_default());
                        }
                        ControlMsg::ChannelAttach { channel, handle } => {
                            self.hub.attach(channel, handle);
                        }
                        ControlMsg::ChannelDetach { channel, id } => {
                            self.hub.detach(channel, id);
                        }
                    }
                }
                _ = tick.tick() => {
                    let now = Utc::now().timestamp();
                    self.housekeeping(now).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.write_checkpoint();
        info!("final checkpoint written, stopping");
        Ok(())
    }
}

/// A failed checkpoint write means state would be silently lost on
/// the next restart, so it is fatal.
fn checkpoint_to_disk(path: &std::path::Path, rendered: &str, logs: usize) {
    if let Err(err) = checkpoint::write_file(path, rendered) {
        error!(path = %path.display(), error = %err, "checkpoint write failed, aborting");
        std::process::exit(1);
    }
    debug!(logs, path = %path.display(), "checkpoint written");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_bump() {
        let mut c = Counters::default();
        c.bump("status");
        c.bump("status");
        c.bump("ping");
        assert_eq!(c.total, 3);
        assert_eq!(c.per_command["status"], 2);
        assert_eq!(c.per_command["ping"], 1);
    }

    #[tokio::test]
    async fn test_status_message_creates_log() {
        let mut d = Daemon::new(DaemonConfig::default(), {
            let mut hosts = HostsConfig::default();
            hosts.push(xymon_common::config::HostDef {
                name: "www1".into(),
                ip: "10.0.0.1".into(),
                page: "servers".into(),
                netgroup: String::new(),
                dialup: false,
                downtimes: Vec::new(),
                tags: Vec::new(),
            });
            hosts
        });
        let sender: IpAddr = "10.0.0.1".parse().unwrap();
        let reply = d
            .handle_message("status www1.disk red / is 99% full\n", sender, 1_700_000_000)
            .await;
        assert!(reply.is_none());
        let log = d.engine.find_log("www1", "disk").expect("log created");
        assert_eq!(log.color, xymon_common::Color::Red);

        let board = d
            .handle_message("xymondboard host=www1", sender, 1_700_000_001)
            .await
            .expect("board reply");
        assert!(board.contains("www1|disk|red"));
    }

    #[tokio::test]
    async fn test_unknown_command_gets_no_reply() {
        let mut d = Daemon::new(DaemonConfig::default(), HostsConfig::default());
        let sender: IpAddr = "127.0.0.1".parse().unwrap();
        let reply = d.handle_message("frobnicate www1", sender, 1_700_000_000).await;
        assert!(reply.is_none());
        assert_eq!(d.counters.total, 0);
    }

    #[tokio::test]
    async fn test_schedule_list_and_cancel() {
        let mut d = Daemon::new(DaemonConfig::default(), HostsConfig::default());
        let sender: IpAddr = "127.0.0.1".parse().unwrap();
        let now = 1_700_000_000;
        d.handle_message("schedule 1700000600 disable www1.disk 10 planned", sender, now)
            .await;
        let listing = d.handle_message("schedule", sender, now).await.unwrap();
        assert!(listing.starts_with("1|1700000600|127.0.0.1|"));
        d.handle_message("schedule cancel 1", sender, now).await;
        let listing = d.handle_message("schedule", sender, now).await.unwrap();
        assert!(listing.is_empty());
    }
}
