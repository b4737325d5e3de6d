//! Inbound message dispatch.
//!
//! Classifies the command, applies the sender access list for its
//! class, then routes to the state machine or a read-only query
//! handler. Malformed or unauthorized messages are logged and dropped
//! without a response; only query-class commands ever answer.

use std::net::IpAddr;

use chrono::DateTime;
use tracing::{info, warn};

use xymon_common::config::{oksender, HostsConfig};
use xymon_common::wire::{first_token, nlencode, split_host_test};
use xymon_common::{ChannelName, Color, XymonError, VERSION};

use crate::daemon::{Daemon, ScheduledTask};
use crate::log::StatusLog;
use crate::protocol::{
    classify_command, embedded_sender, parse_validity, split_combo, BoardField, BoardFilter,
    CommandClass,
};

/// Handle one inbound message. Returns the response for query-class
/// commands, `None` otherwise.
pub fn dispatch(d: &mut Daemon, msg: &str, sender: IpAddr, now: i64) -> Option<String> {
    let msg = msg.trim_start_matches(['\r', '\n']);
    let (first, rest) = first_token(msg);
    if first.is_empty() {
        return None;
    }
    let base = first.split(['+', '/']).next().unwrap_or(first);
    let Some(class) = classify_command(first) else {
        warn!(command = first, %sender, "unknown command dropped");
        return None;
    };
    let acl = &d.engine.cfg.acl;
    let list = match class {
        CommandClass::Status => &acl.status_senders,
        CommandClass::Maintenance => &acl.maintenance_senders,
        CommandClass::Admin => &acl.admin_senders,
        CommandClass::ReadOnly => &acl.www_senders,
    };
    if !oksender(list, sender) {
        warn!(command = first, %sender, "sender not permitted, message dropped");
        return None;
    }
    d.counters.bump(base);

    let sender_str = sender.to_string();
    let outcome: Result<Option<String>, XymonError> = match base {
        "status" => handle_status(d, first, rest, &sender_str, now, false).map(|_| None),
        "summary" => handle_status(d, first, rest, &sender_str, now, true).map(|_| None),
        "combo" => {
            let body = msg.strip_prefix("combo").unwrap_or(msg);
            for part in split_combo(body) {
                let part_sender = embedded_sender(part)
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| sender_str.clone());
                let (pfirst, prest) = first_token(part);
                if pfirst.split('+').next() != Some("status") {
                    warn!(%sender, "combo part without status command skipped");
                    continue;
                }
                if let Err(err) = handle_status(d, pfirst, prest, &part_sender, now, false) {
                    warn!(%sender, error = %err, "combo part dropped");
                }
            }
            Ok(None)
        }
        "modify" => handle_modify(d, rest, now).map(|_| None),
        "data" => handle_data(d, rest, &sender_str, now).map(|_| None),
        "notes" => handle_usermsg(d, ChannelName::Notes, rest, &sender_str).map(|_| None),
        "usermsg" => handle_usermsg(d, ChannelName::User, rest, &sender_str).map(|_| None),
        "enable" => handle_enable(d, rest, &sender_str, now).map(|_| None),
        "disable" => handle_disable(d, rest, &sender_str, now).map(|_| None),
        "xymondack" => handle_ack(d, rest, now).map(|_| None),
        "ackinfo" => handle_ackinfo(d, rest, now).map(|_| None),
        "drop" => handle_drop(d, rest).map(|_| None),
        "rename" => handle_rename(d, rest).map(|_| None),
        "notify" => handle_notify(d, rest, &sender_str).map(|_| None),
        "client" => handle_client(d, first, rest, &sender_str, now).map(|_| None),
        "schedule" => handle_schedule(d, rest, &sender_str, now),
        "query" => handle_query(d, rest),
        "xymondboard" => handle_board(d, rest, now, false),
        "xymondxboard" => handle_board(d, rest, now, true),
        "xymondlog" => handle_log_query(d, rest, false),
        "xymondxlog" => handle_log_query(d, rest, true),
        "hostinfo" => handle_hostinfo(d, rest),
        "clientlog" => handle_clientlog(d, rest),
        "ghostlist" => Ok(Some(render_ghostlist(d))),
        "multisrclist" => Ok(Some(render_multisrclist(d))),
        "config" | "download" => handle_file(d, rest),
        "flush" => {
            d.filecache.clear();
            info!("file cache flushed");
            Ok(None)
        }
        "reload" => handle_reload(d).map(|_| None),
        "rotate" => {
            info!("rotate requested, log management is external");
            Ok(None)
        }
        "ping" => Ok(Some(format!("xymond {}\n", VERSION))),
        _ => Err(XymonError::Malformed(first.to_string())),
    };

    match outcome {
        Ok(reply) => reply,
        Err(err) => {
            warn!(command = base, %sender, error = %err, "message dropped");
            None
        }
    }
}

/// Split a status-ish body into `HOST.TEST`, first-line remainder and
/// message body.
fn parse_target(rest: &str) -> Result<(String, String, String, String), XymonError> {
    let rest = rest.trim_start_matches([' ', '\t']);
    let (line1, body) = match rest.split_once('\n') {
        Some((l, b)) => (l, b),
        None => (rest, ""),
    };
    let mut words = line1.splitn(2, [' ', '\t']);
    let target = words.next().unwrap_or("");
    let remainder = words.next().unwrap_or("").to_string();
    let (host, test) = split_host_test(target)
        .ok_or_else(|| XymonError::Malformed(format!("bad host.test: {target}")))?;
    Ok((host, test, remainder, body.to_string()))
}

fn handle_status(
    d: &mut Daemon,
    first: &str,
    rest: &str,
    sender: &str,
    now: i64,
    summary: bool,
) -> Result<(), XymonError> {
    let validity = parse_validity(first, d.engine.cfg.default_validity_mins)?;
    let (host, test, remainder, body) = parse_target(rest)?;
    let color_token = remainder.split_whitespace().next().unwrap_or("");
    let color =
        Color::parse(color_token).ok_or_else(|| XymonError::BadColor(color_token.to_string()))?;
    let message = if body.is_empty() {
        remainder.clone()
    } else {
        format!("{remainder}\n{body}")
    };
    let downtime_cause = DateTime::from_timestamp(now, 0)
        .and_then(|ts| d.engine.hosts_cfg.check_downtime(&host, &test, &ts));
    d.engine.apply_status(crate::engine::StatusArgs {
        now,
        sender,
        origin: "xymond",
        hostname: &host,
        testname: &test,
        color,
        validity_mins: validity,
        grouplist: None,
        downtime_cause,
        modify_only: false,
        summary,
        message,
    })
}

fn handle_modify(d: &mut Daemon, rest: &str, now: i64) -> Result<(), XymonError> {
    let (host, test, remainder, _body) = parse_target(rest)?;
    let mut words = remainder.splitn(3, [' ', '\t']);
    let color_token = words.next().unwrap_or("");
    let source = words.next().unwrap_or("");
    let cause = words.next().unwrap_or("").trim();
    let color =
        Color::parse(color_token).ok_or_else(|| XymonError::BadColor(color_token.to_string()))?;
    if source.is_empty() {
        return Err(XymonError::Malformed("modify without source".to_string()));
    }
    d.engine.modify(&host, &test, color, source, cause, now)
}

fn handle_data(d: &mut Daemon, rest: &str, sender: &str, now: i64) -> Result<(), XymonError> {
    let (host, test, remainder, body) = parse_target(rest)?;
    let payload = if remainder.is_empty() {
        body
    } else {
        format!("{remainder}\n{body}")
    };
    d.engine.data_report(&host, &test, &payload, sender, now)
}

fn handle_usermsg(
    d: &mut Daemon,
    channel: ChannelName,
    rest: &str,
    sender: &str,
) -> Result<(), XymonError> {
    let rest = rest.trim_start_matches([' ', '\t']);
    let (line1, body) = match rest.split_once('\n') {
        Some((l, b)) => (l, b),
        None => (rest, ""),
    };
    let id = line1.split_whitespace().next().unwrap_or("");
    if id.is_empty() {
        return Err(XymonError::Malformed("missing message id".to_string()));
    }
    d.engine.user_message(channel, id, body, sender);
    Ok(())
}

fn handle_enable(d: &mut Daemon, rest: &str, sender: &str, now: i64) -> Result<(), XymonError> {
    let (host, test, _, _) = parse_target(rest)?;
    d.engine.enable(&host, &test, sender, now)
}

fn handle_disable(d: &mut Daemon, rest: &str, sender: &str, now: i64) -> Result<(), XymonError> {
    let (host, test, remainder, body) = parse_target(rest)?;
    let mut words = remainder.splitn(2, [' ', '\t']);
    let duration: i64 = words
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| XymonError::Malformed("bad disable duration".to_string()))?;
    let mut text = words.next().unwrap_or("").trim().to_string();
    if !body.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(body.trim_end());
    }
    d.engine.disable(&host, &test, duration, &text, sender, now)
}

fn handle_ack(d: &mut Daemon, rest: &str, now: i64) -> Result<(), XymonError> {
    let mut words = rest.split_whitespace();
    let cookie: i64 = words
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| XymonError::Malformed("bad ack cookie".to_string()))?;
    let duration: i64 = words
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| XymonError::Malformed("bad ack duration".to_string()))?;
    let text: String = {
        let trimmed = rest.trim_start();
        let mut iter = trimmed.splitn(3, char::is_whitespace);
        iter.next();
        iter.next();
        iter.next().unwrap_or("").trim().to_string()
    };
    d.engine.ack(cookie, duration, &text, now)
}

/// `ackinfo HOST.TEST\nLEVEL\nVALIDUNTIL\nACKEDBY\nMSG`. A small
/// VALIDUNTIL is taken as seconds from now, a large one as an epoch.
fn handle_ackinfo(d: &mut Daemon, rest: &str, now: i64) -> Result<(), XymonError> {
    let rest = rest.trim_start_matches([' ', '\t']);
    let mut lines = rest.lines();
    let target = lines.next().unwrap_or("").trim();
    let (host, test) = split_host_test(target)
        .ok_or_else(|| XymonError::Malformed(format!("bad host.test: {target}")))?;
    let level: i32 = lines
        .next()
        .unwrap_or("")
        .trim()
        .parse()
        .map_err(|_| XymonError::Malformed("bad ackinfo level".to_string()))?;
    let raw_valid: i64 = lines
        .next()
        .unwrap_or("")
        .trim()
        .parse()
        .map_err(|_| XymonError::Malformed("bad ackinfo validity".to_string()))?;
    let valid_until = if raw_valid > 1_000_000_000 {
        raw_valid
    } else {
        now + raw_valid
    };
    let acked_by = lines.next().unwrap_or("").trim().to_string();
    let msg: String = lines.collect::<Vec<_>>().join("\n");
    d.engine
        .ackinfo(&host, &test, level, valid_until, &acked_by, &msg, now)
}

fn handle_drop(d: &mut Daemon, rest: &str) -> Result<(), XymonError> {
    let mut words = rest.split_whitespace();
    let host = words
        .next()
        .ok_or_else(|| XymonError::Malformed("drop without host".to_string()))?;
    match words.next() {
        Some(test) => d.engine.drop_test(host, test),
        None => d.engine.drop_host(host),
    }
}

fn handle_rename(d: &mut Daemon, rest: &str) -> Result<(), XymonError> {
    let words: Vec<&str> = rest.split_whitespace().collect();
    match words.as_slice() {
        [host, newname] => d.engine.rename_host(host, newname),
        [host, oldtest, newtest] => d.engine.rename_test(host, oldtest, newtest),
        _ => Err(XymonError::Malformed("bad rename arguments".to_string())),
    }
}

fn handle_notify(d: &mut Daemon, rest: &str, sender: &str) -> Result<(), XymonError> {
    let (host, test, remainder, body) = parse_target(rest)?;
    let msg = if body.is_empty() {
        remainder
    } else {
        format!("{remainder}\n{body}")
    };
    d.engine.notify(&host, &test, &msg, sender);
    Ok(())
}

/// `client[/COLLECTOR] HOST.OS CLASS` followed by the report body.
fn handle_client(
    d: &mut Daemon,
    first: &str,
    rest: &str,
    sender: &str,
    now: i64,
) -> Result<(), XymonError> {
    let collector = first.split_once('/').map_or("default", |(_, c)| c);
    let (host, os, remainder, body) = parse_target(rest)?;
    let class = remainder.split_whitespace().next().unwrap_or(os.as_str());
    d.engine
        .client_report(&host, &os, class, collector, body, sender, now)
}

fn handle_schedule(
    d: &mut Daemon,
    rest: &str,
    sender: &str,
    now: i64,
) -> Result<Option<String>, XymonError> {
    let rest = rest.trim();
    if rest.is_empty() {
        let mut out = String::new();
        for task in &d.scheduler {
            out.push_str(&format!(
                "{}|{}|{}|{}\n",
                task.id,
                task.execution_time,
                task.sender,
                nlencode(&task.command)
            ));
        }
        return Ok(Some(out));
    }
    if let Some(id_str) = rest.strip_prefix("cancel ") {
        let id: u64 = id_str
            .trim()
            .parse()
            .map_err(|_| XymonError::Malformed("bad schedule id".to_string()))?;
        let before = d.scheduler.len();
        d.scheduler.retain(|t| t.id != id);
        if d.scheduler.len() == before {
            return Err(XymonError::Malformed(format!("no scheduled task {id}")));
        }
        return Ok(None);
    }
    let (time_str, command) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| XymonError::Malformed("schedule without command".to_string()))?;
    let execution_time: i64 = time_str
        .parse()
        .map_err(|_| XymonError::Malformed("bad schedule time".to_string()))?;
    if execution_time <= now {
        return Err(XymonError::Malformed("schedule time in the past".to_string()));
    }
    let id = d.next_task_id;
    d.next_task_id += 1;
    d.scheduler.push(ScheduledTask {
        id,
        execution_time,
        sender: sender.to_string(),
        command: command.to_string(),
    });
    d.scheduler.sort_by_key(|t| (t.execution_time, t.id));
    Ok(None)
}

fn handle_query(d: &mut Daemon, rest: &str) -> Result<Option<String>, XymonError> {
    let (host, test, _, _) = parse_target(rest)?;
    let log = d
        .engine
        .find_log(&host, &test)
        .ok_or_else(|| XymonError::UnknownTest(format!("{host}.{test}")))?;
    Ok(Some(format!("{}\n", log.line1())))
}

fn board_field(d: &Daemon, log: &StatusLog, field: BoardField) -> String {
    let reg = &d.engine.registry;
    match field {
        BoardField::Hostname => reg.host_name(log.key.host).to_string(),
        BoardField::Testname => reg.test_name(log.key.test).to_string(),
        BoardField::Color => log.color.to_string(),
        BoardField::Flags => log.flags.clone().unwrap_or_default(),
        BoardField::Lastchange => log.lastchange().to_string(),
        BoardField::Logtime => log.logtime.to_string(),
        BoardField::Validtime => log.validtime.to_string(),
        BoardField::Acktime => log.acktime.to_string(),
        BoardField::Disabletime => log.enabletime.to_string(),
        BoardField::Sender => log.sender.clone(),
        BoardField::Cookie => log.cookie.map(|c| c.value).unwrap_or(0).to_string(),
        BoardField::Line1 => log.line1().to_string(),
        BoardField::Ackmsg => nlencode(log.ackmsg.as_deref().unwrap_or("")),
        BoardField::Dismsg => nlencode(log.dismsg.as_deref().unwrap_or("")),
        BoardField::Msg => nlencode(&log.message),
        BoardField::Flapinfo => u8::from(log.flapping).to_string(),
        BoardField::Modifiers => nlencode(
            &log.modifiers
                .iter()
                .map(|m| format!("{}:{}:{}", m.source, m.color, m.cause))
                .collect::<Vec<_>>()
                .join(";"),
        ),
    }
}

fn board_matches(d: &Daemon, log: &StatusLog, filter: &BoardFilter) -> bool {
    let reg = &d.engine.registry;
    let hostname = reg.host_name(log.key.host);
    let testname = reg.test_name(log.key.test);
    let hostdef = d.engine.hosts_cfg.host_info(hostname);
    if let Some(re) = &filter.host {
        if !re.is_match(hostname) {
            return false;
        }
    }
    if let Some(re) = &filter.test {
        if !re.is_match(testname) {
            return false;
        }
    }
    if let Some(re) = &filter.page {
        let page = hostdef.map_or("", |h| h.page.as_str());
        if !re.is_match(page) {
            return false;
        }
    }
    if let Some(net) = &filter.net {
        let group = hostdef.map_or("", |h| h.netgroup.as_str());
        if group != net {
            return false;
        }
    }
    if let Some(colors) = &filter.colors {
        if !colors.contains(&log.color) {
            return false;
        }
    }
    if let Some(level) = filter.acklevel {
        if !log
            .acklist
            .iter()
            .any(|r| r.level == level && r.cleared_at.is_none())
        {
            return false;
        }
    }
    true
}

fn handle_board(
    d: &mut Daemon,
    rest: &str,
    _now: i64,
    xml: bool,
) -> Result<Option<String>, XymonError> {
    let filter = BoardFilter::parse(rest.trim())?;
    let mut out = String::new();
    if xml {
        out.push_str("<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<StatusBoard>\n");
    }
    for log in d.engine.logs.values() {
        if !board_matches(d, log, &filter) {
            continue;
        }
        if xml {
            out.push_str("  <ServerStatus>\n");
            for field in &filter.fields {
                let name = format!("{:?}", field).to_ascii_lowercase();
                out.push_str(&format!(
                    "    <{name}>{}</{name}>\n",
                    xml_escape(&board_field(d, log, *field))
                ));
            }
            out.push_str("  </ServerStatus>\n");
        } else {
            let line: Vec<String> = filter
                .fields
                .iter()
                .map(|f| board_field(d, log, *f))
                .collect();
            out.push_str(&line.join("|"));
            out.push('\n');
        }
    }
    if xml {
        out.push_str("</StatusBoard>\n");
    }
    Ok(Some(out))
}

fn handle_log_query(d: &mut Daemon, rest: &str, xml: bool) -> Result<Option<String>, XymonError> {
    let (host, test, _, _) = parse_target(rest)?;
    let log = d
        .engine
        .find_log(&host, &test)
        .ok_or_else(|| XymonError::UnknownTest(format!("{host}.{test}")))?;
    let reg = &d.engine.registry;
    if xml {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<ServerStatus>\n");
        for (name, value) in [
            ("hostname", reg.host_name(log.key.host).to_string()),
            ("testname", reg.test_name(log.key.test).to_string()),
            ("color", log.color.to_string()),
            ("lastchange", log.lastchange().to_string()),
            ("logtime", log.logtime.to_string()),
            ("validtime", log.validtime.to_string()),
            ("acktime", log.acktime.to_string()),
            ("disabletime", log.enabletime.to_string()),
            ("sender", log.sender.clone()),
            ("cookie", log.cookie.map(|c| c.value).unwrap_or(0).to_string()),
            ("message", log.message.clone()),
        ] {
            out.push_str(&format!("  <{name}>{}</{name}>\n", xml_escape(&value)));
        }
        out.push_str("</ServerStatus>\n");
        return Ok(Some(out));
    }
    let line = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}\n{}\n",
        reg.host_name(log.key.host),
        reg.test_name(log.key.test),
        log.color,
        log.flags.as_deref().unwrap_or(""),
        log.lastchange(),
        log.logtime,
        log.validtime,
        log.acktime,
        log.enabletime,
        log.sender,
        log.cookie.map(|c| c.value).unwrap_or(0),
        nlencode(log.ackmsg.as_deref().unwrap_or("")),
        nlencode(log.dismsg.as_deref().unwrap_or("")),
        log.message,
    );
    Ok(Some(line))
}

fn handle_hostinfo(d: &mut Daemon, rest: &str) -> Result<Option<String>, XymonError> {
    let rest = rest.trim();
    let render = |def: &xymon_common::config::HostDef| {
        format!(
            "{}|{}|{}|{}|{}|{}\n",
            def.name,
            def.ip,
            def.page,
            def.netgroup,
            u8::from(def.dialup),
            def.tags.join(" ")
        )
    };
    if let Some(name) = rest.strip_prefix("clone=") {
        let def = d
            .engine
            .hosts_cfg
            .host_info(name.trim())
            .ok_or_else(|| XymonError::UnknownHost(name.trim().to_string()))?;
        return Ok(Some(render(def)));
    }
    let mut out = String::new();
    for def in d.engine.hosts_cfg.iter() {
        out.push_str(&render(def));
    }
    Ok(Some(out))
}

fn handle_clientlog(d: &mut Daemon, rest: &str) -> Result<Option<String>, XymonError> {
    let mut words = rest.split_whitespace();
    let host = words
        .next()
        .ok_or_else(|| XymonError::Malformed("clientlog without host".to_string()))?;
    let sections: Option<Vec<&str>> = words
        .find_map(|w| w.strip_prefix("section="))
        .map(|s| s.split(',').collect());
    let host_id = d
        .engine
        .registry
        .find_host(host)
        .ok_or_else(|| XymonError::UnknownHost(host.to_string()))?;
    let entry = d
        .engine
        .registry
        .host(host_id)
        .ok_or_else(|| XymonError::UnknownHost(host.to_string()))?;
    let mut out = String::new();
    let mut reports: Vec<_> = entry.client_reports.values().collect();
    reports.sort_by_key(|r| r.timestamp);
    for report in reports {
        match &sections {
            None => {
                out.push_str(&report.msg);
                if !report.msg.ends_with('\n') {
                    out.push('\n');
                }
            }
            Some(wanted) => out.push_str(&extract_sections(&report.msg, wanted)),
        }
    }
    Ok(Some(out))
}

/// Pull `[section]` blocks out of a client report.
fn extract_sections(msg: &str, wanted: &[&str]) -> String {
    let mut out = String::new();
    let mut keep = false;
    for line in msg.lines() {
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            keep = wanted.contains(&name);
        }
        if keep {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn render_ghostlist(d: &Daemon) -> String {
    let mut out = String::new();
    for (name, ghost) in &d.engine.ghosts {
        out.push_str(&format!("{}|{}|{}\n", name, ghost.sender, ghost.last_seen));
    }
    out
}

fn render_multisrclist(d: &Daemon) -> String {
    let mut out = String::new();
    for ((host, test), rec) in &d.engine.multisrc {
        out.push_str(&format!(
            "{}.{}|{}|{}|{}\n",
            d.engine.registry.host_name(*host),
            d.engine.registry.test_name(*test),
            rec.sender1,
            rec.sender2,
            rec.last_seen
        ));
    }
    out
}

/// Serve a file from the configured directory through the cache. Path
/// components may not escape the directory.
fn handle_file(d: &mut Daemon, rest: &str) -> Result<Option<String>, XymonError> {
    let name = rest.trim();
    if name.is_empty()
        || name.starts_with('/')
        || name.split('/').any(|c| c == "..")
    {
        return Err(XymonError::Malformed(format!("bad file name: {name}")));
    }
    let path = d.engine.cfg.serve_dir.join(name);
    if let Some(cached) = d.filecache.get(&path) {
        return Ok(Some(cached.clone()));
    }
    let contents = std::fs::read_to_string(&path)?;
    d.filecache.insert(path, contents.clone());
    Ok(Some(contents))
}

fn handle_reload(d: &mut Daemon) -> Result<(), XymonError> {
    let path = d.engine.cfg.hosts_file.clone();
    let new_cfg = HostsConfig::load(&path).map_err(|e| XymonError::Malformed(e.to_string()))?;
    d.engine.hosts_cfg = new_cfg;
    // the configuration is authoritative: logs for removed hosts go away
    let doomed: Vec<String> = d
        .engine
        .registry
        .hosts()
        .filter(|(_, entry)| {
            entry.kind == crate::registry::HostKind::Normal
                && !d.engine.hosts_cfg.is_known(&entry.name)
                && !entry
                    .name
                    .eq_ignore_ascii_case(&d.engine.cfg.self_hostname)
        })
        .map(|(_, entry)| entry.name.clone())
        .collect();
    for name in doomed {
        let _ = d.engine.drop_host(&name);
    }
    d.filecache.clear();
    info!(hosts = d.engine.hosts_cfg.len(), "hosts configuration reloaded");
    Ok(())
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use xymon_common::config::{DaemonConfig, HostDef, HostsConfig};
    use xymon_common::Color;

    const T0: i64 = 1_700_000_000;

    fn test_daemon() -> Daemon {
        let mut hosts = HostsConfig::default();
        for (name, page) in [("www1", "servers/web"), ("db1", "servers/db")] {
            hosts.push(HostDef {
                name: name.to_string(),
                ip: "10.1.2.3".into(),
                page: page.to_string(),
                netgroup: "dmz".into(),
                dialup: false,
                downtimes: Vec::new(),
                tags: Vec::new(),
            });
        }
        Daemon::new(DaemonConfig::default(), hosts)
    }

    fn ip(addr: &str) -> IpAddr {
        addr.parse().unwrap()
    }

    #[test]
    fn test_status_and_query() {
        let mut d = test_daemon();
        assert!(dispatch(&mut d, "status www1.disk red / is full", ip("10.1.2.3"), T0).is_none());
        let reply = dispatch(&mut d, "query www1.disk", ip("10.1.2.3"), T0).unwrap();
        assert_eq!(reply, "red / is full\n");
    }

    #[test]
    fn test_status_with_validity_suffix() {
        let mut d = test_daemon();
        dispatch(&mut d, "status+120 www1.disk green all fine", ip("10.1.2.3"), T0);
        let log = d.engine.find_log("www1", "disk").unwrap();
        assert_eq!(log.validtime, T0 + 120 * 60);
    }

    #[test]
    fn test_bad_color_is_dropped() {
        let mut d = test_daemon();
        dispatch(&mut d, "status www1.disk chartreuse odd", ip("10.1.2.3"), T0);
        assert!(d.engine.find_log("www1", "disk").is_none());
    }

    #[test]
    fn test_acl_rejects_unlisted_sender() {
        let mut d = test_daemon();
        d.engine.cfg.acl.status_senders = vec!["10.0.0.0/8".to_string()];
        dispatch(&mut d, "status www1.disk red oops", ip("192.168.1.50"), T0);
        assert!(d.engine.find_log("www1", "disk").is_none());
        assert_eq!(d.counters.total, 0);

        // loopback is always allowed
        dispatch(&mut d, "status www1.disk red oops", ip("127.0.0.1"), T0);
        assert!(d.engine.find_log("www1", "disk").is_some());
    }

    #[test]
    fn test_combo_splits_into_parts() {
        let mut d = test_daemon();
        let msg = "combo\nstatus www1.disk green fine\n\nstatus db1.cpu yellow loaded";
        dispatch(&mut d, msg, ip("10.1.2.3"), T0);
        assert_eq!(d.engine.find_log("www1", "disk").unwrap().color, Color::Green);
        assert_eq!(d.engine.find_log("db1", "cpu").unwrap().color, Color::Yellow);
    }

    #[test]
    fn test_combo_part_keeps_relayed_sender() {
        let mut d = test_daemon();
        let msg = "combo\nstatus www1.disk green fine\n\
                   Status message received from 10.9.9.9\n\n\
                   status db1.cpu green ok";
        dispatch(&mut d, msg, ip("10.1.2.3"), T0);
        // the relay override applies to its own part only
        assert_eq!(d.engine.find_log("www1", "disk").unwrap().sender, "10.9.9.9");
        assert_eq!(d.engine.find_log("db1", "cpu").unwrap().sender, "10.1.2.3");
    }

    #[test]
    fn test_board_filters_and_fields() {
        let mut d = test_daemon();
        dispatch(&mut d, "status www1.disk red full", ip("10.1.2.3"), T0);
        dispatch(&mut d, "status db1.disk green fine", ip("10.1.2.3"), T0);

        let all = dispatch(&mut d, "xymondboard", ip("127.0.0.1"), T0).unwrap();
        assert_eq!(all.lines().count(), 2);

        let reds = dispatch(
            &mut d,
            "xymondboard color=red fields=hostname,testname,color",
            ip("127.0.0.1"),
            T0,
        )
        .unwrap();
        assert_eq!(reds, "www1|disk|red\n");

        let paged = dispatch(
            &mut d,
            "xymondboard page=servers/db fields=hostname",
            ip("127.0.0.1"),
            T0,
        )
        .unwrap();
        assert_eq!(paged, "db1\n");
    }

    #[test]
    fn test_xboard_is_xml() {
        let mut d = test_daemon();
        dispatch(&mut d, "status www1.disk red full", ip("10.1.2.3"), T0);
        let xml = dispatch(
            &mut d,
            "xymondxboard fields=hostname,color",
            ip("127.0.0.1"),
            T0,
        )
        .unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<hostname>www1</hostname>"));
        assert!(xml.contains("<color>red</color>"));
    }

    #[test]
    fn test_xymondlog_includes_message() {
        let mut d = test_daemon();
        dispatch(&mut d, "status www1.disk red full\nsecond line", ip("10.1.2.3"), T0);
        let reply = dispatch(&mut d, "xymondlog www1.disk", ip("127.0.0.1"), T0).unwrap();
        assert!(reply.starts_with("www1|disk|red|"));
        assert!(reply.contains("\nred full\nsecond line"));
    }

    #[test]
    fn test_ping_reports_version() {
        let mut d = test_daemon();
        let reply = dispatch(&mut d, "ping", ip("127.0.0.1"), T0).unwrap();
        assert!(reply.starts_with("xymond "));
    }

    #[test]
    fn test_ghostlist_lists_unknown_hosts() {
        let mut d = test_daemon();
        dispatch(&mut d, "status intruder.disk red boo", ip("10.9.9.9"), T0);
        let reply = dispatch(&mut d, "ghostlist", ip("127.0.0.1"), T0).unwrap();
        assert!(reply.contains("intruder|10.9.9.9|"));
    }

    #[test]
    fn test_hostinfo_clone() {
        let mut d = test_daemon();
        let reply = dispatch(&mut d, "hostinfo clone=www1", ip("127.0.0.1"), T0).unwrap();
        assert_eq!(reply, "www1|10.1.2.3|servers/web|dmz|0|\n");
    }

    #[test]
    fn test_clientlog_section_filter() {
        let mut d = test_daemon();
        let msg = "client www1.linux web\n[df]\n/dev/sda1 90%\n[ports]\n22 LISTEN\n";
        dispatch(&mut d, msg, ip("10.1.2.3"), T0);
        let reply = dispatch(
            &mut d,
            "clientlog www1 section=ports",
            ip("127.0.0.1"),
            T0,
        )
        .unwrap();
        assert_eq!(reply, "[ports]\n22 LISTEN\n");
    }

    #[test]
    fn test_config_refuses_path_traversal() {
        let mut d = test_daemon();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("analysis.cfg"), "PAGE servers\n").unwrap();
        d.engine.cfg.serve_dir = dir.path().to_path_buf();

        let ok = dispatch(&mut d, "config analysis.cfg", ip("127.0.0.1"), T0);
        assert_eq!(ok.as_deref(), Some("PAGE servers\n"));
        assert!(dispatch(&mut d, "config ../etc/passwd", ip("127.0.0.1"), T0).is_none());
        assert!(dispatch(&mut d, "config /etc/passwd", ip("127.0.0.1"), T0).is_none());
    }

    #[test]
    fn test_drop_and_rename() {
        let mut d = test_daemon();
        dispatch(&mut d, "status www1.disk red full", ip("10.1.2.3"), T0);
        dispatch(&mut d, "rename www1 disk storage", ip("127.0.0.1"), T0);
        assert!(d.engine.find_log("www1", "storage").is_some());
        dispatch(&mut d, "drop www1 storage", ip("127.0.0.1"), T0);
        assert!(d.engine.find_log("www1", "storage").is_none());
    }
}
