//! Daemon configuration and the hosts registry file.
//!
//! The daemon config is TOML (loaded once at startup); the hosts file
//! uses the classic one-line-per-host format (`IP hostname # tag ...`)
//! and is re-read on the `reload` command.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::color::ColorPolicy;

/// Default config directory.
pub const SYSTEM_CONFIG_DIR: &str = "/etc/xymon";

/// Default runtime data directory (checkpoint, channel sockets).
pub const DATA_DIR: &str = "/var/lib/xymond";

/// Sentinel for "disabled until the test reports OK".
pub const DISABLED_UNTIL_OK: i64 = -1;

/// Daemon configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// TCP listen address for the wire protocol.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory where the per-channel Unix sockets are created.
    #[serde(default = "default_channel_dir")]
    pub channel_dir: PathBuf,

    /// Checkpoint file path.
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: PathBuf,

    /// Seconds between periodic checkpoint saves.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,

    /// Hosts registry file.
    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,

    /// Directory served by the `config`/`download` commands.
    #[serde(default = "default_config_dir")]
    pub serve_dir: PathBuf,

    /// Default validity of a status report, in minutes.
    #[serde(default = "default_validity")]
    pub default_validity_mins: u32,

    /// Number of recent transitions tracked for flap detection.
    #[serde(default = "default_flap_count")]
    pub flap_count: usize,

    /// Flap window in seconds. 0 means "(flap_count + 1) * 5 minutes".
    #[serde(default)]
    pub flap_threshold_secs: i64,

    /// Debounce: seconds a red must persist before it is shown.
    #[serde(default)]
    pub delay_red_secs: i64,

    /// Debounce: seconds a yellow must persist before it is shown.
    #[serde(default)]
    pub delay_yellow_secs: i64,

    /// How long cleared acknowledgement records linger before purge.
    #[serde(default = "default_ack_clear_delay")]
    pub ack_clear_delay_secs: i64,

    /// Lifetime of an alert cookie.
    #[serde(default = "default_cookie_lifetime")]
    pub cookie_lifetime_secs: i64,

    /// Ghost records expire after this much inactivity.
    #[serde(default = "default_ghost_expiry")]
    pub ghost_expiry_secs: i64,

    /// Seconds between staleness sweeps.
    #[serde(default = "default_purple_sweep")]
    pub purple_sweep_secs: u64,

    /// Seconds between self-status statistics reports.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Hard ceiling on an inbound message, in bytes.
    #[serde(default = "default_max_msg_size")]
    pub max_msg_size: usize,

    /// Deadline for a slow channel reader before a post is skipped.
    #[serde(default = "default_drain_timeout")]
    pub channel_drain_timeout_ms: u64,

    /// Ticks a modifier stays active without being refreshed.
    #[serde(default = "default_modifier_validity")]
    pub modifier_validity: i32,

    /// Hostname used for the daemon's own statistics column.
    #[serde(default = "default_self_hostname")]
    pub self_hostname: String,

    /// Connectivity test consulted by the staleness sweep.
    #[serde(default = "default_conn_test")]
    pub conn_test: String,

    /// Alert/OK color sets.
    #[serde(default)]
    pub colors: ColorPolicy,

    /// Sender access lists.
    #[serde(default)]
    pub acl: AclConfig,
}

fn default_listen() -> String {
    format!("0.0.0.0:{}", crate::DEFAULT_PORT)
}
fn default_channel_dir() -> PathBuf {
    PathBuf::from(DATA_DIR).join("channels")
}
fn default_checkpoint_file() -> PathBuf {
    PathBuf::from(DATA_DIR).join("checkpoint.chk")
}
fn default_checkpoint_interval() -> u64 {
    900
}
fn default_hosts_file() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG_DIR).join("hosts.cfg")
}
fn default_config_dir() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG_DIR)
}
fn default_validity() -> u32 {
    30
}
fn default_flap_count() -> usize {
    5
}
fn default_ack_clear_delay() -> i64 {
    720
}
fn default_cookie_lifetime() -> i64 {
    86_400
}
fn default_ghost_expiry() -> i64 {
    600
}
fn default_purple_sweep() -> u64 {
    180
}
fn default_stats_interval() -> u64 {
    300
}
fn default_max_msg_size() -> usize {
    512 * 1024
}
fn default_drain_timeout() -> u64 {
    2_000
}
fn default_modifier_validity() -> i32 {
    30
}
fn default_self_hostname() -> String {
    "xymond".to_string()
}
fn default_conn_test() -> String {
    "conn".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        toml::from_str("").unwrap_or_else(|_| unreachable!("all fields have defaults"))
    }
}

impl DaemonConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: DaemonConfig =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Effective flap window, applying the "(count+1) * 5 min" default.
    pub fn flap_threshold(&self) -> i64 {
        if self.flap_threshold_secs > 0 {
            self.flap_threshold_secs
        } else {
            (self.flap_count as i64 + 1) * 300
        }
    }
}

/// Per-command-class sender allow-lists. An empty list allows anyone;
/// loopback senders are always allowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AclConfig {
    #[serde(default)]
    pub status_senders: Vec<String>,
    #[serde(default)]
    pub maintenance_senders: Vec<String>,
    #[serde(default)]
    pub admin_senders: Vec<String>,
    #[serde(default)]
    pub www_senders: Vec<String>,
}

/// Check a sender IP against an allow-list.
///
/// List entries are exact addresses (`10.1.2.3`), dotted prefixes
/// ending in a dot (`10.1.`), or IPv4 CIDR blocks (`10.1.0.0/16`).
pub fn oksender(list: &[String], sender: IpAddr) -> bool {
    if list.is_empty() || sender.is_loopback() {
        return true;
    }
    let sender_str = sender.to_string();
    for entry in list {
        if let Some((net, bits)) = entry.split_once('/') {
            if let (IpAddr::V4(v4), Ok(net), Ok(bits)) =
                (sender, net.parse::<std::net::Ipv4Addr>(), bits.parse::<u32>())
            {
                if bits <= 32 {
                    let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
                    if u32::from(v4) & mask == u32::from(net) & mask {
                        return true;
                    }
                }
            }
        } else if entry.ends_with('.') {
            if sender_str.starts_with(entry.as_str()) {
                return true;
            }
        } else if entry == &sender_str {
            return true;
        }
    }
    false
}

/// A planned downtime window from a `DOWNTIME=` host tag.
///
/// Syntax: `DOWNTIME=[columns:]days:starttime:endtime[:cause]` with
/// days as digits (0 = Sunday) and times as HHMM. `*` matches every
/// column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowntimeRule {
    pub columns: Vec<String>,
    pub days: Vec<u32>,
    pub start_hhmm: u32,
    pub end_hhmm: u32,
    pub cause: String,
}

impl DowntimeRule {
    pub fn parse(spec: &str) -> Option<DowntimeRule> {
        let parts: Vec<&str> = spec.split(':').collect();
        // days:start:end is the minimal form; a leading column list and
        // a trailing cause are both optional.
        let (columns, rest) = if parts.len() >= 4 && !parts[0].chars().all(|c| c.is_ascii_digit())
        {
            (
                parts[0].split(',').map(|s| s.trim().to_string()).collect(),
                &parts[1..],
            )
        } else {
            (vec!["*".to_string()], &parts[..])
        };
        if rest.len() < 3 {
            return None;
        }
        let days: Vec<u32> = rest[0].chars().filter_map(|c| c.to_digit(10)).collect();
        if days.is_empty() || days.iter().any(|d| *d > 6) {
            return None;
        }
        let start_hhmm: u32 = rest[1].parse().ok()?;
        let end_hhmm: u32 = rest[2].parse().ok()?;
        let cause = if rest.len() > 3 {
            rest[3..].join(":")
        } else {
            "Planned downtime".to_string()
        };
        Some(DowntimeRule {
            columns,
            days,
            start_hhmm,
            end_hhmm,
            cause,
        })
    }

    pub fn covers(&self, test: &str, now: &DateTime<Utc>) -> bool {
        if !self.columns.iter().any(|c| c == "*" || c == test) {
            return false;
        }
        if !self.days.contains(&now.weekday().num_days_from_sunday()) {
            return false;
        }
        let hhmm = now.hour() * 100 + now.minute();
        hhmm >= self.start_hhmm && hhmm <= self.end_hhmm
    }
}

/// One host from the hosts file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDef {
    pub name: String,
    pub ip: String,
    pub page: String,
    pub netgroup: String,
    pub dialup: bool,
    pub downtimes: Vec<DowntimeRule>,
    pub tags: Vec<String>,
}

/// The parsed hosts file, with a case-folded lookup index.
#[derive(Debug, Clone, Default)]
pub struct HostsConfig {
    hosts: Vec<HostDef>,
    index: HashMap<String, usize>,
}

impl HostsConfig {
    /// Parse hosts file text. Lines are `IP hostname # tag tag ...`;
    /// `page <name>` directives set the page path for following hosts.
    pub fn parse(raw: &str) -> HostsConfig {
        let mut cfg = HostsConfig::default();
        let mut current_page = String::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(page) = line.strip_prefix("page ") {
                current_page = page.split_whitespace().next().unwrap_or("").to_string();
                continue;
            }
            let (hostpart, tagpart) = match line.split_once('#') {
                Some((h, t)) => (h, t),
                None => (line, ""),
            };
            let mut words = hostpart.split_whitespace();
            let (ip, name) = match (words.next(), words.next()) {
                (Some(ip), Some(name)) => (ip, name),
                _ => continue,
            };
            let mut def = HostDef {
                name: name.to_string(),
                ip: ip.to_string(),
                page: current_page.clone(),
                netgroup: String::new(),
                dialup: false,
                downtimes: Vec::new(),
                tags: Vec::new(),
            };
            for tag in tagpart.split_whitespace() {
                if tag == "dialup" {
                    def.dialup = true;
                } else if let Some(net) = tag.strip_prefix("NET:") {
                    def.netgroup = net.to_string();
                } else if let Some(spec) = tag.strip_prefix("DOWNTIME=") {
                    if let Some(rule) = DowntimeRule::parse(spec) {
                        def.downtimes.push(rule);
                    }
                }
                def.tags.push(tag.to_string());
            }
            cfg.push(def);
        }
        cfg
    }

    /// Load and parse a hosts file.
    pub fn load(path: &Path) -> Result<HostsConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading hosts file {}", path.display()))?;
        Ok(Self::parse(&raw))
    }

    pub fn push(&mut self, def: HostDef) {
        let key = def.name.to_ascii_lowercase();
        if let Some(&idx) = self.index.get(&key) {
            self.hosts[idx] = def;
        } else {
            self.index.insert(key, self.hosts.len());
            self.hosts.push(def);
        }
    }

    /// Case-insensitive host lookup.
    pub fn host_info(&self, name: &str) -> Option<&HostDef> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|&idx| &self.hosts[idx])
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    /// Returns the downtime cause when a configured window covers the
    /// test at this moment.
    pub fn check_downtime(&self, host: &str, test: &str, now: &DateTime<Utc>) -> Option<String> {
        let def = self.host_info(host)?;
        def.downtimes
            .iter()
            .find(|rule| rule.covers(test, now))
            .map(|rule| rule.cause.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostDef> {
        self.hosts.iter()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = "\
# comment line
page servers
10.0.0.1    db01       # dialup NET:lan DOWNTIME=disk:0123456:0200:0400:backups
10.0.0.2    web01      #
page dmz
192.168.1.1 fw,outer,example  # NET:dmz
";

    #[test]
    fn test_parse_hosts_file() {
        let cfg = HostsConfig::parse(SAMPLE);
        assert_eq!(cfg.len(), 3);
        let db = cfg.host_info("DB01").unwrap();
        assert!(db.dialup);
        assert_eq!(db.netgroup, "lan");
        assert_eq!(db.page, "servers");
        assert_eq!(db.downtimes.len(), 1);
        let fw = cfg.host_info("fw,outer,example").unwrap();
        assert_eq!(fw.page, "dmz");
        assert!(!cfg.is_known("nosuch"));
    }

    #[test]
    fn test_downtime_rule_parse() {
        let rule = DowntimeRule::parse("disk,cpu:06:2300:2359:weekend window").unwrap();
        assert_eq!(rule.columns, vec!["disk", "cpu"]);
        assert_eq!(rule.days, vec![0, 6]);
        assert_eq!(rule.cause, "weekend window");

        let bare = DowntimeRule::parse("12345:0800:1700").unwrap();
        assert_eq!(bare.columns, vec!["*"]);
        assert_eq!(bare.cause, "Planned downtime");

        assert!(DowntimeRule::parse("garbage").is_none());
        assert!(DowntimeRule::parse("9:0100:0200").is_none());
    }

    #[test]
    fn test_downtime_coverage() {
        // 2024-01-07 is a Sunday (day 0)
        let sunday_3am = Utc.with_ymd_and_hms(2024, 1, 7, 3, 0, 0).unwrap();
        let cfg = HostsConfig::parse(SAMPLE);
        assert_eq!(
            cfg.check_downtime("db01", "disk", &sunday_3am),
            Some("backups".to_string())
        );
        assert_eq!(cfg.check_downtime("db01", "cpu", &sunday_3am), None);
        let sunday_5am = Utc.with_ymd_and_hms(2024, 1, 7, 5, 0, 0).unwrap();
        assert_eq!(cfg.check_downtime("db01", "disk", &sunday_5am), None);
    }

    #[test]
    fn test_oksender() {
        let list = vec![
            "10.1.2.3".to_string(),
            "192.168.".to_string(),
            "172.16.0.0/12".to_string(),
        ];
        assert!(oksender(&list, "10.1.2.3".parse().unwrap()));
        assert!(!oksender(&list, "10.1.2.4".parse().unwrap()));
        assert!(oksender(&list, "192.168.44.9".parse().unwrap()));
        assert!(oksender(&list, "172.20.1.1".parse().unwrap()));
        assert!(!oksender(&list, "172.32.1.1".parse().unwrap()));
        // loopback always allowed, empty list allows all
        assert!(oksender(&list, "127.0.0.1".parse().unwrap()));
        assert!(oksender(&[], "8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_config_defaults() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.default_validity_mins, 30);
        assert_eq!(cfg.flap_count, 5);
        assert_eq!(cfg.flap_threshold(), 1800);
        assert_eq!(cfg.ack_clear_delay_secs, 720);
        assert_eq!(cfg.cookie_lifetime_secs, 86_400);
        assert_eq!(cfg.self_hostname, "xymond");
    }

    #[test]
    fn test_config_load_missing_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(DaemonConfig::load(&missing).is_ok());

        let path = dir.path().join("xymond.toml");
        std::fs::write(&path, "listen = \"127.0.0.1:1984\"\ndelay_red_secs = 120\n").unwrap();
        let cfg = DaemonConfig::load(&path).unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:1984");
        assert_eq!(cfg.delay_red_secs, 120);
        assert_eq!(cfg.default_validity_mins, 30);
    }
}
