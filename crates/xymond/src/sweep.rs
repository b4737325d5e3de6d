//! Periodic housekeeping over the status board.
//!
//! Logs that stop receiving reports go purple so their silence is
//! visible; summary logs are simply dropped, and hosts flagged as
//! dialup (or whose network test is already down) go clear instead.

use tracing::{debug, info};

use xymon_common::{AlertClass, Color};

use crate::daemon::Daemon;
use crate::engine::{Engine, StatusArgs};
use crate::log::LogKey;
use crate::registry::HostKind;

/// Sweep the board for logs whose validity has run out.
pub fn check_purple(engine: &mut Engine, now: i64) {
    let mut drops: Vec<LogKey> = Vec::new();
    let mut stale: Vec<LogKey> = Vec::new();
    for (key, log) in &engine.logs {
        if log.validtime >= now || log.color == Color::Purple {
            continue;
        }
        match engine.registry.host(key.host) {
            None => drops.push(*key),
            Some(host) if host.kind == HostKind::Summary => drops.push(*key),
            Some(host) if !engine.hosts_cfg.is_known(&host.name)
                && !host.name.eq_ignore_ascii_case(&engine.cfg.self_hostname) =>
            {
                drops.push(*key)
            }
            Some(_) => {
                // synthetic page content never goes purple
                if engine.registry.test(key.test).is_some_and(|t| t.checkpointed) {
                    stale.push(*key);
                }
            }
        }
    }

    for key in drops {
        debug!(
            host = engine.registry.host_name(key.host),
            test = engine.registry.test_name(key.test),
            "dropping stale log"
        );
        engine.remove_log(key);
    }

    for key in stale {
        let hostname = engine.registry.host_name(key.host).to_string();
        let testname = engine.registry.test_name(key.test).to_string();
        let origin = engine.registry.origin_name(key.origin).to_string();
        let dialup = engine
            .hosts_cfg
            .host_info(&hostname)
            .is_some_and(|h| h.dialup);
        let conn_test = engine.cfg.conn_test.clone();
        let conn_down = testname != conn_test
            && engine
                .find_log(&hostname, &conn_test)
                .is_some_and(|conn| engine.cfg.colors.classify(conn.color) == AlertClass::Alert);
        let color = if dialup || conn_down {
            Color::Clear
        } else {
            Color::Purple
        };
        let last = engine
            .logs
            .get(&key)
            .map(|log| log.line1().to_string())
            .unwrap_or_default();
        let message = format!(
            "{color} No status report received within the expected interval\n\nLast report was:\n{last}"
        );
        info!(host = %hostname, test = %testname, %color, "status went stale");
        if let Err(err) = engine.apply_status(StatusArgs {
            now,
            sender: "xymond",
            origin: &origin,
            hostname: &hostname,
            testname: &testname,
            color,
            validity_mins: engine.cfg.default_validity_mins,
            grouplist: None,
            downtime_cause: None,
            modify_only: false,
            summary: false,
            message,
        }) {
            debug!(host = %hostname, test = %testname, error = %err, "stale update rejected");
        }
    }
}

/// Build the daemon's own status report.
pub fn stats_message(d: &Daemon, now: i64) -> String {
    let uptime_secs = (now - d.started).max(0);
    let mut msg = format!(
        "green xymond statistics\n\nUp for {} seconds\nStatus logs : {}\nHosts       : {}\nGhost hosts : {}\nMessages    : {}\n\nPer command:\n",
        uptime_secs,
        d.engine.logs.len(),
        d.engine.registry.hosts().count(),
        d.engine.ghosts.len(),
        d.counters.total,
    );
    let mut commands: Vec<_> = d.counters.per_command.iter().collect();
    commands.sort_by(|a, b| a.0.cmp(b.0));
    for (command, count) in commands {
        msg.push_str(&format!("  {command:<14} {count}\n"));
    }
    msg.push_str("\nChannels:\n");
    for channel in xymon_common::ChannelName::ALL {
        let (posted, dropped) = d.hub.counters(channel);
        msg.push_str(&format!(
            "  {:<8} seq {} posted {} dropped {} readers {}\n",
            channel.as_str(),
            d.hub.sequence(channel),
            posted,
            dropped,
            d.hub.reader_count(channel),
        ));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use xymon_common::config::{DaemonConfig, HostDef, HostsConfig};

    fn hosts_with(defs: Vec<HostDef>) -> HostsConfig {
        let mut hosts = HostsConfig::default();
        for def in defs {
            hosts.push(def);
        }
        hosts
    }

    fn host(name: &str, dialup: bool) -> HostDef {
        HostDef {
            name: name.to_string(),
            ip: "10.0.0.9".into(),
            page: String::new(),
            netgroup: String::new(),
            dialup,
            downtimes: Vec::new(),
            tags: Vec::new(),
        }
    }

    fn report(engine: &mut Engine, hostname: &str, testname: &str, color: Color, now: i64) {
        engine
            .apply_status(StatusArgs {
                now,
                sender: "10.0.0.9",
                origin: "xymond",
                hostname,
                testname,
                color,
                validity_mins: 5,
                grouplist: None,
                downtime_cause: None,
                modify_only: false,
                summary: false,
                message: format!("{color} test detail"),
            })
            .expect("status accepted");
    }

    #[test]
    fn test_stale_log_goes_purple() {
        let mut engine = Engine::new(DaemonConfig::default(), hosts_with(vec![host("www1", false)]));
        report(&mut engine, "www1", "disk", Color::Green, 1_700_000_000);
        engine.drain_posts();

        check_purple(&mut engine, 1_700_000_000 + 10 * 60);
        let log = engine.find_log("www1", "disk").unwrap();
        assert_eq!(log.color, Color::Purple);
        assert_eq!(log.old_color, Color::Green);
    }

    #[test]
    fn test_fresh_log_left_alone() {
        let mut engine = Engine::new(DaemonConfig::default(), hosts_with(vec![host("www1", false)]));
        report(&mut engine, "www1", "disk", Color::Green, 1_700_000_000);

        check_purple(&mut engine, 1_700_000_000 + 60);
        assert_eq!(engine.find_log("www1", "disk").unwrap().color, Color::Green);
    }

    #[test]
    fn test_dialup_host_goes_clear() {
        let mut engine = Engine::new(DaemonConfig::default(), hosts_with(vec![host("laptop", true)]));
        report(&mut engine, "laptop", "disk", Color::Green, 1_700_000_000);

        check_purple(&mut engine, 1_700_000_000 + 10 * 60);
        assert_eq!(engine.find_log("laptop", "disk").unwrap().color, Color::Clear);
    }

    #[test]
    fn test_unreachable_host_goes_clear() {
        let mut engine = Engine::new(DaemonConfig::default(), hosts_with(vec![host("www1", false)]));
        report(&mut engine, "www1", "conn", Color::Red, 1_700_000_000);
        report(&mut engine, "www1", "disk", Color::Green, 1_700_000_000);
        // keep conn fresh, let disk lapse
        report(&mut engine, "www1", "conn", Color::Red, 1_700_000_500);

        check_purple(&mut engine, 1_700_000_000 + 10 * 60);
        assert_eq!(engine.find_log("www1", "disk").unwrap().color, Color::Clear);
    }
}
