//! The status log entity: one per (host, test, origin) triple.

use std::collections::VecDeque;

use xymon_common::Color;

use crate::registry::{HostId, OriginId, TestId};

/// Key of a status log. At most one log exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogKey {
    pub host: HostId,
    pub test: TestId,
    pub origin: OriginId,
}

/// An acknowledgement record attached via `ackinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub received: i64,
    pub valid_until: i64,
    pub level: i32,
    pub acked_by: String,
    pub msg: String,
    /// Set when the log recovered to OK; the record lingers for the
    /// ack-clear delay and revives if the alert returns in time.
    pub cleared_at: Option<i64>,
}

/// An external source temporarily forcing a color, with a decay
/// counter aged on every status arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modifier {
    pub source: String,
    pub color: Color,
    pub valid: i32,
    pub cause: String,
}

/// Opaque token correlating a later acknowledgement with the alert
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cookie {
    pub value: i64,
    pub expires: i64,
}

#[derive(Debug)]
pub struct StatusLog {
    pub key: LogKey,
    /// Current color; `Color::None` until the first report lands.
    pub color: Color,
    pub old_color: Color,
    /// Color as last reported, before modifier/disable overrides.
    pub base_color: Color,
    pub flapping: bool,
    /// Timestamps of recent color transitions, newest first, bounded
    /// by the configured flap count.
    pub transitions: VecDeque<i64>,
    pub created: i64,
    pub logtime: i64,
    pub validtime: i64,
    /// 0 = enabled, `DISABLED_UNTIL_OK` = until first OK report,
    /// otherwise the epoch when the disable window ends.
    pub enabletime: i64,
    pub dismsg: Option<String>,
    pub downtime_active: bool,
    pub acktime: i64,
    pub ackmsg: Option<String>,
    pub acklist: Vec<AckRecord>,
    pub modifiers: Vec<Modifier>,
    pub message: String,
    pub sender: String,
    pub flags: Option<String>,
    pub grouplist: Option<String>,
    pub cookie: Option<Cookie>,
    pub redstart: i64,
    pub yellowstart: i64,
    pub change_count: u64,
}

impl StatusLog {
    pub fn new(key: LogKey, now: i64) -> Self {
        Self {
            key,
            color: Color::None,
            old_color: Color::None,
            base_color: Color::None,
            flapping: false,
            transitions: VecDeque::new(),
            created: now,
            logtime: now,
            validtime: now,
            enabletime: 0,
            dismsg: None,
            downtime_active: false,
            acktime: 0,
            ackmsg: None,
            acklist: Vec::new(),
            modifiers: Vec::new(),
            message: String::new(),
            sender: String::new(),
            flags: None,
            grouplist: None,
            cookie: None,
            redstart: 0,
            yellowstart: 0,
            change_count: 0,
        }
    }

    /// Time of the most recent color change.
    pub fn lastchange(&self) -> i64 {
        self.transitions.front().copied().unwrap_or(self.created)
    }

    /// Record a color transition in the flap ring.
    pub fn record_transition(&mut self, now: i64, flap_count: usize) {
        self.transitions.push_front(now);
        self.transitions.truncate(flap_count.max(1));
    }

    /// Would a transition at `now` mean the log is flapping: the ring
    /// is full and all tracked transitions happened inside the window.
    pub fn is_flap(&self, now: i64, flap_count: usize, threshold_secs: i64) -> bool {
        self.transitions.len() >= flap_count.max(1)
            && self
                .transitions
                .back()
                .is_some_and(|oldest| now - *oldest < threshold_secs)
    }

    /// First line of the stored message (color token and summary text).
    pub fn line1(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// Live cookie value, if any.
    pub fn live_cookie(&self, now: i64) -> Option<i64> {
        self.cookie
            .filter(|c| c.expires > now)
            .map(|c| c.value)
    }

    /// Upsert a modifier by source name.
    pub fn set_modifier(&mut self, source: &str, color: Color, cause: &str, validity: i32) {
        if let Some(m) = self.modifiers.iter_mut().find(|m| m.source == source) {
            m.color = color;
            m.cause = cause.to_string();
            m.valid = validity;
        } else {
            self.modifiers.push(Modifier {
                source: source.to_string(),
                color,
                valid: validity,
                cause: cause.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> LogKey {
        LogKey {
            host: HostId(0),
            test: TestId(0),
            origin: OriginId(0),
        }
    }

    #[test]
    fn test_flap_ring() {
        let mut log = StatusLog::new(key(), 1000);
        assert_eq!(log.lastchange(), 1000);
        for i in 0..5 {
            log.record_transition(1000 + i * 10, 5);
        }
        assert_eq!(log.transitions.len(), 5);
        assert_eq!(log.lastchange(), 1040);
        // five transitions within 40s, window 1800s: flapping
        assert!(log.is_flap(1050, 5, 1800));
        // ...but not with a 30s window
        assert!(!log.is_flap(1050, 5, 30));
        // ring bounded
        log.record_transition(2000, 5);
        assert_eq!(log.transitions.len(), 5);
    }

    #[test]
    fn test_modifier_upsert() {
        let mut log = StatusLog::new(key(), 0);
        log.set_modifier("rrd", Color::Yellow, "disk trend", 30);
        log.set_modifier("rrd", Color::Red, "disk trend worse", 30);
        assert_eq!(log.modifiers.len(), 1);
        assert_eq!(log.modifiers[0].color, Color::Red);
    }

    #[test]
    fn test_live_cookie() {
        let mut log = StatusLog::new(key(), 0);
        assert_eq!(log.live_cookie(100), None);
        log.cookie = Some(Cookie {
            value: 4711,
            expires: 200,
        });
        assert_eq!(log.live_cookie(100), Some(4711));
        assert_eq!(log.live_cookie(200), None);
    }
}
