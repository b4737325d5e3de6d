//! The state machine around status logs.
//!
//! Every mutation of a status log goes through `apply_status`, which
//! runs the transition policy in a fixed order: validity, modifier
//! aging, flap suppression, disable/downtime overrides, ack
//! bookkeeping, debounce, multi-source detection, cookie issuance and
//! finally event emission. Channel posts are buffered here and drained
//! by the control loop after each handled message.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use xymon_common::config::{DaemonConfig, HostsConfig, DISABLED_UNTIL_OK};
use xymon_common::wire::{extract_flags, nlencode};
use xymon_common::{AlertClass, ChannelName, Color, XymonError};

use crate::channels::ChannelPost;
use crate::log::{AckRecord, Cookie, LogKey, StatusLog};
use crate::registry::{ClientReport, HostId, HostKind, Registry, TestId};

/// A report from a host missing from the hosts file.
#[derive(Debug, Clone)]
pub struct GhostRecord {
    pub sender: String,
    pub last_seen: i64,
}

/// A (host, test) recently reported by two distinct senders.
#[derive(Debug, Clone)]
pub struct MultiSourceRecord {
    pub sender1: String,
    pub sender2: String,
    pub last_seen: i64,
}

/// Arguments to one `apply_status` run.
pub struct StatusArgs<'a> {
    pub now: i64,
    pub sender: &'a str,
    pub origin: &'a str,
    pub hostname: &'a str,
    pub testname: &'a str,
    pub color: Color,
    pub validity_mins: u32,
    pub grouplist: Option<&'a str>,
    pub downtime_cause: Option<String>,
    pub modify_only: bool,
    pub summary: bool,
    /// Status text beginning with the color token of the first line.
    pub message: String,
}

/// All mutable core state: registry, logs, ghosts, multi-source table
/// and the cookie index. Owned exclusively by the control loop.
pub struct Engine {
    pub cfg: DaemonConfig,
    pub hosts_cfg: HostsConfig,
    pub registry: Registry,
    pub logs: BTreeMap<LogKey, StatusLog>,
    pub cookies: HashMap<i64, LogKey>,
    pub ghosts: HashMap<String, GhostRecord>,
    pub multisrc: HashMap<(HostId, TestId), MultiSourceRecord>,
    posts: Vec<ChannelPost>,
}

impl Engine {
    pub fn new(cfg: DaemonConfig, hosts_cfg: HostsConfig) -> Self {
        Self {
            cfg,
            hosts_cfg,
            registry: Registry::new(),
            logs: BTreeMap::new(),
            cookies: HashMap::new(),
            ghosts: HashMap::new(),
            multisrc: HashMap::new(),
            posts: Vec::new(),
        }
    }

    /// Take the channel posts buffered since the last drain.
    pub fn drain_posts(&mut self) -> Vec<ChannelPost> {
        std::mem::take(&mut self.posts)
    }

    pub(crate) fn host_known(&self, hostname: &str) -> bool {
        self.hosts_cfg.is_known(hostname)
            || hostname.eq_ignore_ascii_case(&self.cfg.self_hostname)
    }

    /// Process one status report. This is the only path that changes a
    /// log's color.
    pub fn apply_status(&mut self, a: StatusArgs) -> Result<(), XymonError> {
        // 1. message validity
        if a.message.trim().is_empty() {
            return Err(XymonError::EmptyMessage);
        }
        if !a.summary && !self.host_known(a.hostname) {
            self.record_ghost(a.hostname, a.sender, a.now);
            return Err(XymonError::UnknownHost(a.hostname.to_string()));
        }

        let ip = self
            .hosts_cfg
            .host_info(a.hostname)
            .map(|h| h.ip.clone())
            .unwrap_or_default();
        let kind = if a.summary {
            HostKind::Summary
        } else {
            HostKind::Normal
        };
        let host = self.registry.find_or_create_host(a.hostname, &ip, kind);
        let test = self.registry.find_or_create_test(a.testname);
        let origin = self.registry.find_or_create_origin(a.origin);
        let key = LogKey { host, test, origin };

        // Own the log for the duration of the policy run.
        let mut log = self
            .logs
            .remove(&key)
            .unwrap_or_else(|| StatusLog::new(key, a.now));

        let mut newcolor = a.color;

        // 2. modifier aging
        if !a.modify_only {
            for m in log.modifiers.iter_mut() {
                m.valid -= 1;
            }
            log.modifiers.retain(|m| m.valid > 0);
        }
        if let Some(worst) = log.modifiers.iter().map(|m| m.color).max() {
            if worst > newcolor {
                newcolor = worst;
            }
        }
        log.base_color = a.color;

        // 3. flap detection. Stale transitions (purple either way) do
        // not count as oscillation.
        if newcolor != log.color
            && log.color != Color::None
            && newcolor != Color::Purple
            && log.color != Color::Purple
        {
            log.flapping = log.is_flap(a.now, self.cfg.flap_count, self.cfg.flap_threshold());
            if log.flapping && newcolor < log.color {
                debug!(
                    host = a.hostname,
                    test = a.testname,
                    held = %log.color,
                    proposed = %newcolor,
                    "flapping, improvement suppressed"
                );
                newcolor = log.color;
            }
        }

        // 4. disable / enable override
        if log.enabletime == DISABLED_UNTIL_OK {
            if self.cfg.colors.classify(newcolor) == AlertClass::Ok {
                log.enabletime = 0;
                log.dismsg = None;
                self.posts
                    .push(self.enadis_post(a.hostname, a.testname, a.sender, 0, ""));
            } else {
                newcolor = Color::Blue;
            }
        } else if log.enabletime > a.now {
            newcolor = Color::Blue;
        } else if log.enabletime != 0 {
            // window lapsed
            log.enabletime = 0;
            log.dismsg = None;
        }

        // 5. downtime override
        log.downtime_active = false;
        if let Some(cause) = &a.downtime_cause {
            if matches!(newcolor, Color::Red | Color::Yellow | Color::Purple) {
                newcolor = Color::Blue;
                log.dismsg = Some(cause.clone());
                log.downtime_active = true;
            }
        }

        let oldclass = self.cfg.colors.classify(log.color);
        let newclass = self.cfg.colors.classify(newcolor);

        // 6. acknowledgement bookkeeping
        if log.acktime != 0 && newclass == AlertClass::Ok {
            log.acktime = 0;
            log.ackmsg = None;
            for rec in log.acklist.iter_mut() {
                rec.cleared_at.get_or_insert(a.now);
            }
        } else if newclass == AlertClass::Alert && oldclass == AlertClass::Ok {
            // re-alert inside the clear delay revives the records
            for rec in log.acklist.iter_mut() {
                rec.cleared_at = None;
            }
        }
        let purge_before = a.now - self.cfg.ack_clear_delay_secs;
        log.acklist
            .retain(|r| r.valid_until > a.now && r.cleared_at.map_or(true, |t| t > purge_before));

        // 7. validity & debounce
        let mut validtime = a.now + i64::from(a.validity_mins) * 60;
        if log.acktime > validtime {
            validtime = log.acktime;
        }
        if log.enabletime > validtime {
            validtime = log.enabletime;
        }
        log.validtime = validtime;

        if newcolor >= Color::Yellow {
            if log.yellowstart == 0 {
                log.yellowstart = a.now;
            }
        } else {
            log.yellowstart = 0;
        }
        if newcolor == Color::Red {
            if log.redstart == 0 {
                log.redstart = a.now;
            }
        } else {
            log.redstart = 0;
        }
        if log.color != Color::None {
            if newcolor == Color::Red
                && log.color != Color::Red
                && a.now - log.redstart < self.cfg.delay_red_secs
            {
                // red not yet persisted long enough; step to yellow if
                // that stage has cleared its own delay
                newcolor = if log.yellowstart != 0
                    && a.now - log.yellowstart >= self.cfg.delay_yellow_secs
                {
                    Color::Yellow
                } else {
                    log.color
                };
            } else if newcolor == Color::Yellow
                && log.color < Color::Yellow
                && a.now - log.yellowstart < self.cfg.delay_yellow_secs
            {
                newcolor = log.color;
            }
        }

        // 8. multi-sender detection
        if !a.modify_only
            && !log.sender.is_empty()
            && log.sender != a.sender
            && a.sender != "xymond"
        {
            let rec = MultiSourceRecord {
                sender1: log.sender.clone(),
                sender2: a.sender.to_string(),
                last_seen: a.now,
            };
            info!(
                host = a.hostname,
                test = a.testname,
                sender1 = %rec.sender1,
                sender2 = %rec.sender2,
                "status reported by two senders"
            );
            self.multisrc.insert((host, test), rec);
        }

        // 9. cookie issuance
        let newclass = self.cfg.colors.classify(newcolor);
        if newclass == AlertClass::Alert {
            if log.live_cookie(a.now).is_none() {
                if let Some(old) = log.cookie.take() {
                    self.cookies.remove(&old.value);
                }
                let value = self.mint_cookie(key);
                log.cookie = Some(Cookie {
                    value,
                    expires: a.now + self.cfg.cookie_lifetime_secs,
                });
            }
        } else if let Some(c) = log.cookie {
            if c.expires <= a.now {
                self.cookies.remove(&c.value);
                log.cookie = None;
            }
        }

        // 10. commit and emit
        let oldcolor = log.color;
        let changed = newcolor != oldcolor;
        if changed {
            log.old_color = oldcolor;
            log.record_transition(a.now, self.cfg.flap_count);
            log.color = newcolor;
            log.change_count += 1;
        }
        log.logtime = a.now;
        log.flags = extract_flags(&a.message);
        log.message = a.message;
        if !a.modify_only {
            // a modify run keeps the original reporter
            log.sender = a.sender.to_string();
        }
        log.grouplist = a.grouplist.map(str::to_string);

        if changed {
            self.posts
                .push(self.stachg_post(&log, a.origin, a.hostname, a.testname));
            match (oldclass, newclass) {
                (before, AlertClass::Alert) if before != AlertClass::Alert => {
                    self.posts
                        .push(self.page_post(&log, a.hostname, a.testname, "alert"));
                    self.push_clichg(host, a.hostname, a.sender);
                }
                (AlertClass::Alert, AlertClass::Ok) => {
                    self.posts
                        .push(self.page_post(&log, a.hostname, a.testname, "recovery"));
                }
                (AlertClass::Alert, AlertClass::Alert) => {
                    self.posts
                        .push(self.page_post(&log, a.hostname, a.testname, "changed"));
                }
                _ => {}
            }
        }
        self.posts
            .push(self.status_post(&log, a.origin, a.hostname, a.testname, a.now));

        self.logs.insert(key, log);
        Ok(())
    }

    fn mint_cookie(&mut self, key: LogKey) -> i64 {
        loop {
            let value = i64::from(rand::random::<u32>() >> 1) + 1;
            if let std::collections::hash_map::Entry::Vacant(e) = self.cookies.entry(value) {
                e.insert(key);
                return value;
            }
        }
    }

    /// `modify HOST.TEST COLOR SOURCE CAUSE`: an external source forces
    /// a color with a decay counter, then the stored report is re-run
    /// through the policy without aging anything.
    pub fn modify(
        &mut self,
        hostname: &str,
        testname: &str,
        color: Color,
        source: &str,
        cause: &str,
        now: i64,
    ) -> Result<(), XymonError> {
        let keys = self.log_keys(hostname, testname);
        if keys.is_empty() {
            return Err(XymonError::UnknownTest(format!("{hostname}.{testname}")));
        }
        let validity = self.cfg.modifier_validity;
        for key in keys {
            let (base, message, validity_mins, origin) = {
                let log = match self.logs.get_mut(&key) {
                    Some(l) => l,
                    None => continue,
                };
                log.set_modifier(source, color, cause, validity);
                let mins = ((log.validtime - now) / 60).max(1) as u32;
                (
                    log.base_color,
                    log.message.clone(),
                    mins,
                    self.registry.origin_name(key.origin).to_string(),
                )
            };
            if base == Color::None {
                continue;
            }
            self.apply_status(StatusArgs {
                now,
                sender: "xymond",
                origin: &origin,
                hostname,
                testname,
                color: base,
                validity_mins,
                grouplist: None,
                downtime_cause: None,
                modify_only: true,
                summary: false,
                message,
            })?;
        }
        Ok(())
    }

    /// Disable a test (or `*` for all of a host's tests). Duration < 0
    /// means disabled until the next OK report.
    pub fn disable(
        &mut self,
        hostname: &str,
        testname: &str,
        duration_mins: i64,
        text: &str,
        sender: &str,
        now: i64,
    ) -> Result<(), XymonError> {
        let keys = self.log_keys(hostname, testname);
        if keys.is_empty() {
            return Err(XymonError::UnknownTest(format!("{hostname}.{testname}")));
        }
        let expiry = if duration_mins < 0 {
            DISABLED_UNTIL_OK
        } else {
            now + duration_mins * 60
        };
        for key in keys {
            let test_name = self.registry.test_name(key.test).to_string();
            let origin_name = self.registry.origin_name(key.origin).to_string();
            let Some(log) = self.logs.get_mut(&key) else {
                continue;
            };
            log.enabletime = expiry;
            log.dismsg = if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            };
            if expiry > log.validtime {
                log.validtime = expiry;
            }
            let changed = log.color != Color::Blue && log.color != Color::None;
            if changed {
                log.old_color = log.color;
                log.record_transition(now, self.cfg.flap_count);
                log.color = Color::Blue;
                log.change_count += 1;
            }
            let posts = {
                let log = &self.logs[&key];
                let mut v = vec![self.enadis_post(hostname, &test_name, sender, expiry, text)];
                if changed {
                    v.push(self.stachg_post(log, &origin_name, hostname, &test_name));
                }
                v.push(self.status_post(log, &origin_name, hostname, &test_name, now));
                v
            };
            self.posts.extend(posts);
        }
        Ok(())
    }

    /// Lift a disable window. The color reverts to the last reported
    /// color right away rather than waiting for the next report.
    pub fn enable(
        &mut self,
        hostname: &str,
        testname: &str,
        sender: &str,
        now: i64,
    ) -> Result<(), XymonError> {
        let keys = self.log_keys(hostname, testname);
        if keys.is_empty() {
            return Err(XymonError::UnknownTest(format!("{hostname}.{testname}")));
        }
        for key in keys {
            let test_name = self.registry.test_name(key.test).to_string();
            let origin_name = self.registry.origin_name(key.origin).to_string();
            let Some(log) = self.logs.get_mut(&key) else {
                continue;
            };
            if log.enabletime == 0 {
                continue;
            }
            log.enabletime = 0;
            log.dismsg = None;
            let restored = log.base_color;
            let changed = log.color == Color::Blue && restored != Color::None;
            if changed {
                log.old_color = log.color;
                log.record_transition(now, self.cfg.flap_count);
                log.color = restored;
                log.change_count += 1;
            }
            let posts = {
                let log = &self.logs[&key];
                let mut v = vec![self.enadis_post(hostname, &test_name, sender, 0, "")];
                if changed {
                    v.push(self.stachg_post(log, &origin_name, hostname, &test_name));
                }
                v.push(self.status_post(log, &origin_name, hostname, &test_name, now));
                v
            };
            self.posts.extend(posts);
        }
        Ok(())
    }

    /// Acknowledge by cookie. A negative cookie acknowledges every
    /// alerting log of the host the cookie belongs to.
    pub fn ack(
        &mut self,
        cookie: i64,
        duration_mins: i64,
        text: &str,
        now: i64,
    ) -> Result<(), XymonError> {
        let lookup = cookie.abs();
        let Some(&key) = self.cookies.get(&lookup) else {
            return Err(XymonError::Malformed(format!("no such cookie {cookie}")));
        };
        let acktime = now + duration_mins.max(1) * 60;
        let keys: Vec<LogKey> = if cookie < 0 {
            self.logs
                .range(
                    LogKey {
                        host: key.host,
                        test: TestId(0),
                        origin: crate::registry::OriginId(0),
                    }..,
                )
                .take_while(|(k, _)| k.host == key.host)
                .filter(|(_, l)| self.cfg.colors.classify(l.color) == AlertClass::Alert)
                .map(|(k, _)| *k)
                .collect()
        } else {
            vec![key]
        };
        for key in keys {
            if let Some(log) = self.logs.get_mut(&key) {
                log.acktime = acktime;
                log.ackmsg = Some(text.to_string());
                if acktime > log.validtime {
                    log.validtime = acktime;
                }
            }
        }
        Ok(())
    }

    /// Attach a leveled acknowledgement record (`ackinfo` command).
    pub fn ackinfo(
        &mut self,
        hostname: &str,
        testname: &str,
        level: i32,
        valid_until: i64,
        acked_by: &str,
        msg: &str,
        now: i64,
    ) -> Result<(), XymonError> {
        let keys = self.log_keys(hostname, testname);
        if keys.is_empty() {
            return Err(XymonError::UnknownTest(format!("{hostname}.{testname}")));
        }
        for key in keys {
            if let Some(log) = self.logs.get_mut(&key) {
                log.acklist.push(AckRecord {
                    received: now,
                    valid_until,
                    level,
                    acked_by: acked_by.to_string(),
                    msg: msg.to_string(),
                    cleared_at: None,
                });
            }
        }
        Ok(())
    }

    /// Drop a single test of a host, or the whole host.
    pub fn drop_test(&mut self, hostname: &str, testname: &str) -> Result<(), XymonError> {
        let keys = self.log_keys(hostname, testname);
        if keys.is_empty() {
            return Err(XymonError::UnknownTest(format!("{hostname}.{testname}")));
        }
        for key in keys {
            self.remove_log(key);
        }
        Ok(())
    }

    pub fn drop_host(&mut self, hostname: &str) -> Result<(), XymonError> {
        let Some(host) = self.registry.find_host(hostname) else {
            return Err(XymonError::UnknownHost(hostname.to_string()));
        };
        let keys: Vec<LogKey> = self
            .logs
            .keys()
            .filter(|k| k.host == host)
            .copied()
            .collect();
        for key in keys {
            self.remove_log(key);
        }
        self.multisrc.retain(|(h, _), _| *h != host);
        self.registry.drop_host(host);
        info!(host = hostname, "host dropped");
        Ok(())
    }

    pub fn rename_host(&mut self, old: &str, new: &str) -> Result<(), XymonError> {
        let Some(host) = self.registry.find_host(old) else {
            return Err(XymonError::UnknownHost(old.to_string()));
        };
        if !self.registry.rename_host(host, new) {
            return Err(XymonError::Malformed(format!("rename target {new} exists")));
        }
        Ok(())
    }

    /// Rename one host's test column: logs are re-keyed to the new
    /// interned test id.
    pub fn rename_test(
        &mut self,
        hostname: &str,
        old: &str,
        new: &str,
    ) -> Result<(), XymonError> {
        let keys = self.log_keys(hostname, old);
        if keys.is_empty() {
            return Err(XymonError::UnknownTest(format!("{hostname}.{old}")));
        }
        let new_test = self.registry.find_or_create_test(new);
        for key in keys {
            if let Some(mut log) = self.logs.remove(&key) {
                let new_key = LogKey {
                    test: new_test,
                    ..key
                };
                log.key = new_key;
                if let Some(c) = log.cookie {
                    self.cookies.insert(c.value, new_key);
                }
                self.logs.insert(new_key, log);
            }
        }
        Ok(())
    }

    /// Store a client sub-report and broadcast it on the client channel.
    pub fn client_report(
        &mut self,
        hostname: &str,
        os: &str,
        class: &str,
        collector: &str,
        msg: String,
        sender: &str,
        now: i64,
    ) -> Result<(), XymonError> {
        if !self.host_known(hostname) {
            self.record_ghost(hostname, sender, now);
            return Err(XymonError::UnknownHost(hostname.to_string()));
        }
        let ip = self
            .hosts_cfg
            .host_info(hostname)
            .map(|h| h.ip.clone())
            .unwrap_or_default();
        let host = self
            .registry
            .find_or_create_host(hostname, &ip, HostKind::Normal);
        if let Some(entry) = self.registry.host_mut(host) {
            entry.client_reports.insert(
                collector.to_string(),
                ClientReport {
                    os: os.to_string(),
                    class: class.to_string(),
                    msg: msg.clone(),
                    timestamp: now,
                },
            );
        }
        self.posts.push(ChannelPost {
            channel: ChannelName::Client,
            marker: ChannelName::Client.as_str(),
            hostname: hostname.to_string(),
            sender: sender.to_string(),
            tail: format!("|{}|{}|{}|{}\n{}", hostname, os, class, collector, msg),
        });
        Ok(())
    }

    /// Pass a data report through to the data channel; no state change.
    pub fn data_report(
        &mut self,
        hostname: &str,
        testname: &str,
        msg: &str,
        sender: &str,
        now: i64,
    ) -> Result<(), XymonError> {
        if !self.host_known(hostname) {
            self.record_ghost(hostname, sender, now);
            return Err(XymonError::UnknownHost(hostname.to_string()));
        }
        self.posts.push(ChannelPost {
            channel: ChannelName::Data,
            marker: ChannelName::Data.as_str(),
            hostname: hostname.to_string(),
            sender: sender.to_string(),
            tail: format!("|{}|{}\n{}", hostname, testname, msg),
        });
        Ok(())
    }

    /// Forward a notes or usermsg body to its channel.
    pub fn user_message(&mut self, channel: ChannelName, id: &str, msg: &str, sender: &str) {
        self.posts.push(ChannelPost {
            channel,
            marker: channel.as_str(),
            hostname: id.to_string(),
            sender: sender.to_string(),
            tail: format!("|{}\n{}", id, msg),
        });
    }

    /// Forward a notify message onto the page channel.
    pub fn notify(&mut self, hostname: &str, testname: &str, msg: &str, sender: &str) {
        let pagepath = self
            .hosts_cfg
            .host_info(hostname)
            .map(|h| h.page.clone())
            .unwrap_or_default();
        self.posts.push(ChannelPost {
            channel: ChannelName::Page,
            marker: "notify",
            hostname: hostname.to_string(),
            sender: sender.to_string(),
            tail: format!("|{}|{}|{}\n{}", hostname, testname, pagepath, msg),
        });
    }

    pub fn record_ghost(&mut self, hostname: &str, sender: &str, now: i64) {
        warn!(host = hostname, sender, "report from unknown host");
        self.ghosts.insert(
            hostname.to_ascii_lowercase(),
            GhostRecord {
                sender: sender.to_string(),
                last_seen: now,
            },
        );
    }

    pub fn expire_ghosts(&mut self, now: i64) {
        let deadline = now - self.cfg.ghost_expiry_secs;
        self.ghosts.retain(|_, g| g.last_seen > deadline);
        self.multisrc.retain(|_, m| m.last_seen > deadline);
    }

    /// All log keys for a (host, test) pair across origins; `*`
    /// matches every test of the host.
    pub fn log_keys(&self, hostname: &str, testname: &str) -> Vec<LogKey> {
        let Some(host) = self.registry.find_host(hostname) else {
            return Vec::new();
        };
        let test = if testname == "*" {
            None
        } else {
            match self.registry.find_test(testname) {
                Some(t) => Some(t),
                None => return Vec::new(),
            }
        };
        self.logs
            .keys()
            .filter(|k| k.host == host && test.map_or(true, |t| k.test == t))
            .copied()
            .collect()
    }

    pub fn find_log(&self, hostname: &str, testname: &str) -> Option<&StatusLog> {
        self.log_keys(hostname, testname)
            .first()
            .and_then(|k| self.logs.get(k))
    }

    pub fn remove_log(&mut self, key: LogKey) {
        if let Some(log) = self.logs.remove(&key) {
            if let Some(c) = log.cookie {
                self.cookies.remove(&c.value);
            }
        }
    }

    fn push_clichg(&mut self, host: HostId, hostname: &str, sender: &str) {
        // newest sub-report wins
        let Some((timestamp, msg)) = self
            .registry
            .host(host)
            .and_then(|h| h.client_reports.values().max_by_key(|r| r.timestamp))
            .map(|r| (r.timestamp, r.msg.clone()))
        else {
            return;
        };
        self.posts.push(ChannelPost {
            channel: ChannelName::Clichg,
            marker: ChannelName::Clichg.as_str(),
            hostname: hostname.to_string(),
            sender: sender.to_string(),
            tail: format!("|{}|{}\n{}", hostname, timestamp, msg),
        });
    }

    fn pagepath(&self, hostname: &str) -> String {
        self.hosts_cfg
            .host_info(hostname)
            .map(|h| h.page.clone())
            .unwrap_or_default()
    }

    fn status_post(
        &self,
        log: &StatusLog,
        origin: &str,
        hostname: &str,
        testname: &str,
        now: i64,
    ) -> ChannelPost {
        let class = self
            .registry
            .host(log.key.host)
            .and_then(|h| h.client_reports.values().max_by_key(|r| r.timestamp))
            .map(|r| r.class.clone())
            .unwrap_or_default();
        let client_ts = self
            .registry
            .host(log.key.host)
            .and_then(|h| h.client_reports.values().map(|r| r.timestamp).max())
            .unwrap_or(0);
        let modifiers = log
            .modifiers
            .iter()
            .map(|m| format!("{}:{}:{}", m.source, m.color, m.cause))
            .collect::<Vec<_>>()
            .join(";");
        let tail = format!(
            "|{origin}|{host}|{test}|{valid}|{color}|{flags}|{oldcolor}|{lastchange}|{acktime}|{ackmsg}|{enabletime}|{dismsg}|{clients}|{class}|{page}|{flapping}|{mods}\n{msg}",
            origin = origin,
            host = hostname,
            test = testname,
            valid = log.validtime,
            color = log.color,
            flags = log.flags.as_deref().unwrap_or(""),
            oldcolor = log.old_color,
            lastchange = log.lastchange(),
            acktime = log.acktime,
            ackmsg = nlencode(log.ackmsg.as_deref().unwrap_or("")),
            enabletime = log.enabletime,
            dismsg = nlencode(log.dismsg.as_deref().unwrap_or("")),
            clients = client_ts,
            class = class,
            page = self.pagepath(hostname),
            flapping = u8::from(log.flapping),
            mods = nlencode(&modifiers),
            msg = log.message,
        );
        ChannelPost {
            channel: ChannelName::Status,
            marker: ChannelName::Status.as_str(),
            hostname: hostname.to_string(),
            sender: log.sender.clone(),
            tail,
        }
    }

    fn stachg_post(
        &self,
        log: &StatusLog,
        origin: &str,
        hostname: &str,
        testname: &str,
    ) -> ChannelPost {
        let tail = format!(
            "|{origin}|{host}|{test}|{lastchange}|{oldcolor}|{newcolor}|{indowntime}\n{msg}",
            origin = origin,
            host = hostname,
            test = testname,
            lastchange = log.lastchange(),
            oldcolor = log.old_color,
            newcolor = log.color,
            indowntime = u8::from(log.downtime_active),
            msg = log.message,
        );
        ChannelPost {
            channel: ChannelName::Stachg,
            marker: ChannelName::Stachg.as_str(),
            hostname: hostname.to_string(),
            sender: log.sender.clone(),
            tail,
        }
    }

    fn page_post(
        &self,
        log: &StatusLog,
        hostname: &str,
        testname: &str,
        event: &str,
    ) -> ChannelPost {
        let ip = self
            .registry
            .host(log.key.host)
            .map(|h| h.ip.clone())
            .unwrap_or_default();
        let tail = format!(
            "|{host}|{test}|{ip}|{color}|{oldcolor}|{page}|{cookie}|{event}\n{msg}",
            host = hostname,
            test = testname,
            ip = ip,
            color = log.color,
            oldcolor = log.old_color,
            page = self.pagepath(hostname),
            cookie = log.cookie.map(|c| c.value).unwrap_or(0),
            event = event,
            msg = log.message,
        );
        ChannelPost {
            channel: ChannelName::Page,
            marker: ChannelName::Page.as_str(),
            hostname: hostname.to_string(),
            sender: log.sender.clone(),
            tail,
        }
    }

    fn enadis_post(
        &self,
        hostname: &str,
        testname: &str,
        sender: &str,
        expiry: i64,
        cause: &str,
    ) -> ChannelPost {
        ChannelPost {
            channel: ChannelName::Enadis,
            marker: ChannelName::Enadis.as_str(),
            hostname: hostname.to_string(),
            sender: sender.to_string(),
            tail: format!("|{}|{}|{}|{}", hostname, testname, expiry, nlencode(cause)),
        }
    }
}
