//! Wire command classification and parsing helpers.
//!
//! The dispatcher routes on the first token of a message. Parsing
//! here works on immutable slices only; nothing is tokenized in
//! place.

use regex::Regex;

use xymon_common::{Color, XymonError};

/// Command classes for the sender access lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Status-bearing reports from agents.
    Status,
    /// Operator maintenance: enable/disable/ack/schedule/notify.
    Maintenance,
    /// Administrative: drop/rename/reload/rotate/flush.
    Admin,
    /// Read-only queries.
    ReadOnly,
}

/// Classify a command by its first token; `None` means unknown.
pub fn classify_command(first: &str) -> Option<CommandClass> {
    let base = first.split(['+', '/']).next().unwrap_or(first);
    match base {
        "status" | "combo" | "summary" | "data" | "client" | "modify" | "notes" | "usermsg" => {
            Some(CommandClass::Status)
        }
        "enable" | "disable" | "xymondack" | "ackinfo" | "schedule" | "notify" => {
            Some(CommandClass::Maintenance)
        }
        "drop" | "rename" | "reload" | "rotate" | "flush" => Some(CommandClass::Admin),
        "query" | "xymondboard" | "xymondxboard" | "xymondlog" | "xymondxlog" | "hostinfo"
        | "clientlog" | "ghostlist" | "multisrclist" | "config" | "download" | "ping" => {
            Some(CommandClass::ReadOnly)
        }
        _ => None,
    }
}

/// Does this command produce a synchronous response? Mutating commands
/// are fire-and-forget.
pub fn wants_response(first: &str) -> bool {
    matches!(
        first.split(['+', '/']).next().unwrap_or(first),
        "query"
            | "xymondboard"
            | "xymondxboard"
            | "xymondlog"
            | "xymondxlog"
            | "hostinfo"
            | "clientlog"
            | "ghostlist"
            | "multisrclist"
            | "config"
            | "download"
            | "ping"
            | "schedule"
    )
}

/// Parse the validity suffix of `status+DURATION`. Returns the
/// validity in minutes, or an error for a malformed suffix.
pub fn parse_validity(first: &str, default_mins: u32) -> Result<u32, XymonError> {
    match first.split_once('+') {
        None => Ok(default_mins),
        Some((_, dur)) => dur
            .parse::<u32>()
            .map_err(|_| XymonError::Malformed(format!("bad validity suffix: {first}"))),
    }
}

/// Split a combo message into its individual status blocks. Blocks are
/// separated by a blank line immediately followed by a new `status`
/// command.
pub fn split_combo(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = body.trim_start_matches('\n');
    loop {
        match rest.find("\n\nstatus") {
            Some(idx) => {
                let part = &rest[..idx];
                if !part.trim().is_empty() {
                    parts.push(part);
                }
                rest = &rest[idx + 2..];
            }
            None => {
                if !rest.trim().is_empty() {
                    parts.push(rest);
                }
                break;
            }
        }
    }
    parts
}

/// Look for the sender override a relay proxy appends to a forwarded
/// status ("Status message received from 1.2.3.4").
pub fn embedded_sender(part: &str) -> Option<std::net::IpAddr> {
    for line in part.lines() {
        if let Some(rest) = line.trim().strip_prefix("Status message received from ") {
            if let Ok(ip) = rest.trim().parse() {
                return Some(ip);
            }
        }
    }
    None
}

/// Fields selectable with the board `fields=` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardField {
    Hostname,
    Testname,
    Color,
    Flags,
    Lastchange,
    Logtime,
    Validtime,
    Acktime,
    Disabletime,
    Sender,
    Cookie,
    Line1,
    Ackmsg,
    Dismsg,
    Msg,
    Flapinfo,
    Modifiers,
}

impl BoardField {
    pub fn parse(name: &str) -> Option<BoardField> {
        match name {
            "hostname" => Some(BoardField::Hostname),
            "testname" => Some(BoardField::Testname),
            "color" => Some(BoardField::Color),
            "flags" => Some(BoardField::Flags),
            "lastchange" => Some(BoardField::Lastchange),
            "logtime" => Some(BoardField::Logtime),
            "validtime" => Some(BoardField::Validtime),
            "acktime" => Some(BoardField::Acktime),
            "disabletime" => Some(BoardField::Disabletime),
            "sender" => Some(BoardField::Sender),
            "cookie" => Some(BoardField::Cookie),
            "line1" => Some(BoardField::Line1),
            "ackmsg" => Some(BoardField::Ackmsg),
            "dismsg" => Some(BoardField::Dismsg),
            "msg" => Some(BoardField::Msg),
            "flapinfo" => Some(BoardField::Flapinfo),
            "modifiers" => Some(BoardField::Modifiers),
            _ => None,
        }
    }

    pub fn default_set() -> Vec<BoardField> {
        vec![
            BoardField::Hostname,
            BoardField::Testname,
            BoardField::Color,
            BoardField::Flags,
            BoardField::Lastchange,
            BoardField::Logtime,
            BoardField::Validtime,
            BoardField::Acktime,
            BoardField::Disabletime,
            BoardField::Sender,
            BoardField::Cookie,
            BoardField::Line1,
        ]
    }
}

/// Parsed `xymondboard` filter expressions.
#[derive(Debug)]
pub struct BoardFilter {
    pub page: Option<Regex>,
    pub host: Option<Regex>,
    pub net: Option<String>,
    pub test: Option<Regex>,
    pub colors: Option<Vec<Color>>,
    pub acklevel: Option<i32>,
    pub fields: Vec<BoardField>,
}

impl Default for BoardFilter {
    fn default() -> Self {
        Self {
            page: None,
            host: None,
            net: None,
            test: None,
            colors: None,
            acklevel: None,
            fields: BoardField::default_set(),
        }
    }
}

impl BoardFilter {
    pub fn parse(args: &str) -> Result<BoardFilter, XymonError> {
        let mut filter = BoardFilter::default();
        for word in args.split_whitespace() {
            let Some((key, value)) = word.split_once('=') else {
                return Err(XymonError::Malformed(format!("bad filter: {word}")));
            };
            match key {
                "page" => filter.page = Some(anchored(value)?),
                "host" => filter.host = Some(anchored(value)?),
                "net" => filter.net = Some(value.to_string()),
                "test" => filter.test = Some(anchored(value)?),
                "color" => {
                    let mut colors = Vec::new();
                    for tok in value.split(',') {
                        colors.push(
                            Color::parse(tok)
                                .ok_or_else(|| XymonError::BadColor(tok.to_string()))?,
                        );
                    }
                    filter.colors = Some(colors);
                }
                "acklevel" => {
                    filter.acklevel = Some(value.parse().map_err(|_| {
                        XymonError::Malformed(format!("bad acklevel: {value}"))
                    })?);
                }
                "fields" => {
                    let mut fields = Vec::new();
                    for tok in value.split(',') {
                        fields.push(BoardField::parse(tok).ok_or_else(|| {
                            XymonError::Malformed(format!("unknown field: {tok}"))
                        })?);
                    }
                    filter.fields = fields;
                }
                _ => return Err(XymonError::Malformed(format!("unknown filter: {key}"))),
            }
        }
        Ok(filter)
    }
}

fn anchored(pattern: &str) -> Result<Regex, XymonError> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| XymonError::Malformed(format!("bad pattern {pattern}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_command() {
        assert_eq!(classify_command("status"), Some(CommandClass::Status));
        assert_eq!(classify_command("status+45"), Some(CommandClass::Status));
        assert_eq!(classify_command("client/rrd"), Some(CommandClass::Status));
        assert_eq!(classify_command("disable"), Some(CommandClass::Maintenance));
        assert_eq!(classify_command("drop"), Some(CommandClass::Admin));
        assert_eq!(classify_command("xymondboard"), Some(CommandClass::ReadOnly));
        assert_eq!(classify_command("frobnicate"), None);
    }

    #[test]
    fn test_parse_validity() {
        assert_eq!(parse_validity("status", 30).unwrap(), 30);
        assert_eq!(parse_validity("status+45", 30).unwrap(), 45);
        assert!(parse_validity("status+x", 30).is_err());
    }

    #[test]
    fn test_split_combo() {
        let body = "status a.disk green\nok\n\nstatus b.cpu red\nload high\n\nstatus c.mem yellow\nwarn";
        let parts = split_combo(body);
        assert_eq!(parts.len(), 3);
        assert!(parts[0].starts_with("status a.disk green"));
        assert!(parts[1].starts_with("status b.cpu red"));
        assert!(parts[2].starts_with("status c.mem yellow"));
    }

    #[test]
    fn test_split_combo_single() {
        let parts = split_combo("status a.disk green\nline\nanother line");
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_embedded_sender() {
        let part = "status a.disk green\nok\nStatus message received from 10.9.8.7\n";
        assert_eq!(embedded_sender(part), Some("10.9.8.7".parse().unwrap()));
        assert_eq!(embedded_sender("status a.disk green\nok"), None);
    }

    #[test]
    fn test_board_filter_parse() {
        let f = BoardFilter::parse("host=web.* color=red,yellow test=disk fields=hostname,color").unwrap();
        assert!(f.host.as_ref().unwrap().is_match("webserver"));
        assert!(!f.host.as_ref().unwrap().is_match("db01"));
        assert_eq!(
            f.colors,
            Some(vec![Color::Red, Color::Yellow])
        );
        assert_eq!(f.fields, vec![BoardField::Hostname, BoardField::Color]);

        assert!(BoardFilter::parse("color=pink").is_err());
        assert!(BoardFilter::parse("bogus=1").is_err());
        assert!(BoardFilter::parse("noequals").is_err());
    }

    #[test]
    fn test_board_filter_anchoring() {
        let f = BoardFilter::parse("host=web").unwrap();
        // patterns are anchored, not substring matches
        assert!(f.host.as_ref().unwrap().is_match("web"));
        assert!(!f.host.as_ref().unwrap().is_match("webserver"));
    }
}
