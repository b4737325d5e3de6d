//! Checkpoint persistence.
//!
//! The full status board is written as one line per log, text fields
//! escaped so a line stays a line. Restore is tolerant: lines that no
//! longer match the hosts configuration are discarded.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use xymon_common::wire::{nldecode, nlencode};
use xymon_common::{Color, CHECKPOINT_MAGIC};

use crate::daemon::ScheduledTask;
use crate::engine::Engine;
use crate::log::{AckRecord, Cookie, LogKey, StatusLog};
use crate::registry::HostKind;

/// Render the board, acknowledgement records and scheduled tasks.
pub fn render(engine: &Engine, tasks: &[ScheduledTask]) -> String {
    let mut out = String::new();
    for log in engine.logs.values() {
        let reg = &engine.registry;
        if reg
            .host(log.key.host)
            .map_or(true, |h| h.kind == HostKind::Summary)
        {
            continue;
        }
        if reg.test(log.key.test).map_or(true, |t| !t.checkpointed) {
            continue;
        }
        let hostname = reg.host_name(log.key.host);
        let testname = reg.test_name(log.key.test);
        out.push_str(&format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}\n",
            CHECKPOINT_MAGIC,
            reg.origin_name(log.key.origin),
            hostname,
            testname,
            log.sender,
            log.color,
            log.flags.as_deref().unwrap_or(""),
            log.old_color,
            log.logtime,
            log.lastchange(),
            log.validtime,
            log.enabletime,
            log.acktime,
            log.cookie.map(|c| c.value).unwrap_or(0),
            log.cookie.map(|c| c.expires).unwrap_or(0),
            nlencode(&log.message),
            nlencode(log.dismsg.as_deref().unwrap_or("")),
            nlencode(log.ackmsg.as_deref().unwrap_or("")),
            log.redstart,
            log.yellowstart,
        ));
        for ack in log.acklist.iter().filter(|a| a.cleared_at.is_none()) {
            out.push_str(&format!(
                "{}|.acklist.|{}|{}|{}|{}|{}|{}|{}\n",
                CHECKPOINT_MAGIC,
                hostname,
                testname,
                ack.received,
                ack.valid_until,
                ack.level,
                ack.acked_by,
                nlencode(&ack.msg),
            ));
        }
    }
    for task in tasks {
        out.push_str(&format!(
            "{}|.task.|{}|{}|{}|{}\n",
            CHECKPOINT_MAGIC,
            task.id,
            task.execution_time,
            task.sender,
            nlencode(&task.command),
        ));
    }
    out
}

/// Write the checkpoint through a temp file and atomic rename.
pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)
        .with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}

/// Load a checkpoint into an empty engine. Returns the number of logs
/// restored.
pub fn restore(engine: &mut Engine, tasks: &mut Vec<ScheduledTask>, path: &Path) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut restored = 0usize;
    for line in raw.lines() {
        let Some(rest) = line.strip_prefix(CHECKPOINT_MAGIC) else {
            continue;
        };
        let rest = rest.strip_prefix('|').unwrap_or(rest);
        if let Some(body) = rest.strip_prefix(".acklist.|") {
            restore_ack(engine, body);
        } else if let Some(body) = rest.strip_prefix(".task.|") {
            restore_task(tasks, body);
        } else if restore_log(engine, rest) {
            restored += 1;
        }
    }
    debug!(restored, tasks = tasks.len(), "checkpoint parsed");
    Ok(restored)
}

fn restore_log(engine: &mut Engine, body: &str) -> bool {
    let f: Vec<&str> = body.split('|').collect();
    if f.len() < 19 {
        warn!(fields = f.len(), "short checkpoint line skipped");
        return false;
    }
    let (origin, hostname, testname, sender) = (f[0], f[1], f[2], f[3]);
    if !engine.host_known(hostname) {
        debug!(host = hostname, "checkpointed host no longer configured, skipped");
        return false;
    }
    if xymon_common::SYNTHETIC_TESTS.contains(&testname) {
        return false;
    }
    let Some(color) = Color::parse(f[4]) else {
        return false;
    };
    let ip = engine
        .hosts_cfg
        .host_info(hostname)
        .map_or(String::new(), |h| h.ip.clone());
    let key = LogKey {
        host: engine
            .registry
            .find_or_create_host(hostname, &ip, HostKind::Normal),
        test: engine.registry.find_or_create_test(testname),
        origin: engine.registry.find_or_create_origin(origin),
    };
    let num = |s: &str| s.parse::<i64>().unwrap_or(0);
    let logtime = num(f[7]);
    let mut log = StatusLog::new(key, logtime);
    log.sender = sender.to_string();
    log.color = color;
    log.base_color = color;
    log.flags = (!f[5].is_empty()).then(|| f[5].to_string());
    log.old_color = Color::parse(f[6]).unwrap_or(Color::None);
    log.logtime = logtime;
    log.transitions.push_front(num(f[8]));
    log.validtime = num(f[9]);
    log.enabletime = num(f[10]);
    log.acktime = num(f[11]);
    let cookie_value = num(f[12]);
    if cookie_value != 0 {
        let cookie = Cookie {
            value: cookie_value,
            expires: num(f[13]),
        };
        log.cookie = Some(cookie);
        engine.cookies.insert(cookie.value, key);
    }
    log.message = nldecode(f[14]);
    log.dismsg = (!f[15].is_empty()).then(|| nldecode(f[15]));
    log.ackmsg = (!f[16].is_empty()).then(|| nldecode(f[16]));
    log.redstart = num(f[17]);
    log.yellowstart = num(f[18]);
    engine.logs.insert(key, log);
    true
}

fn restore_ack(engine: &mut Engine, body: &str) {
    let f: Vec<&str> = body.split('|').collect();
    if f.len() < 7 {
        return;
    }
    let Some(log) = engine
        .log_keys(f[0], f[1])
        .first()
        .copied()
        .and_then(|key| engine.logs.get_mut(&key))
    else {
        return;
    };
    let num = |s: &str| s.parse::<i64>().unwrap_or(0);
    log.acklist.push(AckRecord {
        received: num(f[2]),
        valid_until: num(f[3]),
        level: f[4].parse().unwrap_or(0),
        acked_by: f[5].to_string(),
        msg: nldecode(f[6]),
        cleared_at: None,
    });
}

fn restore_task(tasks: &mut Vec<ScheduledTask>, body: &str) {
    let f: Vec<&str> = body.split('|').collect();
    if f.len() < 4 {
        return;
    }
    tasks.push(ScheduledTask {
        id: f[0].parse().unwrap_or(0),
        execution_time: f[1].parse().unwrap_or(0),
        sender: f[2].to_string(),
        command: nldecode(f[3]),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use xymon_common::config::{DaemonConfig, HostDef, HostsConfig};

    fn engine_with_host(name: &str) -> Engine {
        let mut hosts = HostsConfig::default();
        hosts.push(HostDef {
            name: name.to_string(),
            ip: "10.0.0.5".into(),
            page: "servers".into(),
            netgroup: String::new(),
            dialup: false,
            downtimes: Vec::new(),
            tags: Vec::new(),
        });
        Engine::new(DaemonConfig::default(), hosts)
    }

    fn red_status(engine: &mut Engine, host: &str, test: &str, now: i64) {
        engine
            .apply_status(crate::engine::StatusArgs {
                now,
                sender: "10.0.0.5",
                origin: "xymond",
                hostname: host,
                testname: test,
                color: Color::Red,
                validity_mins: 30,
                grouplist: None,
                downtime_cause: None,
                modify_only: false,
                summary: false,
                message: "red / is 99% full".to_string(),
            })
            .expect("status accepted");
    }

    #[test]
    fn test_roundtrip_restores_log_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint");

        let mut engine = engine_with_host("www1");
        red_status(&mut engine, "www1", "disk", 1_700_000_000);
        let cookie = engine.find_log("www1", "disk").unwrap().cookie.unwrap();
        let tasks = vec![ScheduledTask {
            id: 7,
            execution_time: 1_700_009_999,
            sender: "127.0.0.1".into(),
            command: "enable www1.disk".into(),
        }];
        write_file(&path, &render(&engine, &tasks)).unwrap();

        let mut fresh = engine_with_host("www1");
        let mut fresh_tasks = Vec::new();
        let restored = restore(&mut fresh, &mut fresh_tasks, &path).unwrap();
        assert_eq!(restored, 1);
        let log = fresh.find_log("www1", "disk").expect("log restored");
        assert_eq!(log.color, Color::Red);
        assert_eq!(log.sender, "10.0.0.5");
        assert_eq!(log.message, "red / is 99% full");
        assert_eq!(log.cookie.unwrap().value, cookie.value);
        assert_eq!(fresh.cookies.get(&cookie.value), Some(&log.key));
        assert_eq!(fresh_tasks.len(), 1);
        assert_eq!(fresh_tasks[0].command, "enable www1.disk");
    }

    #[test]
    fn test_restore_discards_unconfigured_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint");

        let mut engine = engine_with_host("www1");
        red_status(&mut engine, "www1", "disk", 1_700_000_000);
        write_file(&path, &render(&engine, &[])).unwrap();

        let mut fresh = engine_with_host("db1");
        let restored = restore(&mut fresh, &mut Vec::new(), &path).unwrap();
        assert_eq!(restored, 0);
        assert!(fresh.logs.is_empty());
    }

    #[test]
    fn test_synthetic_tests_not_checkpointed() {
        let mut engine = engine_with_host("www1");
        red_status(&mut engine, "www1", "disk", 1_700_000_000);
        engine
            .apply_status(crate::engine::StatusArgs {
                now: 1_700_000_000,
                sender: "10.0.0.5",
                origin: "xymond",
                hostname: "www1",
                testname: "info",
                color: Color::Green,
                validity_mins: 30,
                grouplist: None,
                downtime_cause: None,
                modify_only: false,
                summary: false,
                message: "green host details".to_string(),
            })
            .expect("info accepted");
        let rendered = render(&engine, &[]);
        assert!(rendered.contains("|disk|"));
        assert!(!rendered.contains("|info|"));
    }
}
