//! Wire-level helpers: field escaping, record framing, host.test
//! splitting.
//!
//! Channel records and checkpoint lines are pipe-delimited, so any
//! free-text field (messages, disable text, ack text) is escaped before
//! it is embedded and unescaped on the way back out.

/// Escape a free-text field for embedding in a pipe-delimited record.
///
/// Newlines, carriage returns, tabs, backslashes and the pipe
/// delimiter itself are replaced by backslash escapes (`|` becomes
/// `\p` since `\|` would be ambiguous in some downstream parsers).
pub fn nlencode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '|' => out.push_str("\\p"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse of [`nlencode`]. Unrecognized escapes are passed through
/// verbatim rather than rejected.
pub fn nldecode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('p') => out.push('|'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Build the channel record header: `@@marker#seq/hostname|epoch.usec|sender`.
pub fn record_header(marker: &str, seq: u64, hostname: &str, epoch_usec: (i64, u32), sender: &str) -> String {
    format!(
        "@@{}#{}/{}|{}.{:06}|{}",
        marker, seq, hostname, epoch_usec.0, epoch_usec.1, sender
    )
}

/// Record terminator line, on a line of its own.
pub const RECORD_END: &str = "\n@@\n";

/// Split a `HOST.TEST` word into its parts.
///
/// The hostname may itself contain dots; on the wire those are sent as
/// commas, so the split happens at the *last* dot and commas in the
/// host part are translated back.
pub fn split_host_test(word: &str) -> Option<(String, String)> {
    let idx = word.rfind('.')?;
    let (host, test) = (&word[..idx], &word[idx + 1..]);
    if host.is_empty() || test.is_empty() {
        return None;
    }
    Some((host.replace(',', "."), test.to_string()))
}

/// Normalize a hostname for registry lookup: wire commas become dots,
/// case is folded.
pub fn canonical_hostname(name: &str) -> String {
    name.replace(',', ".").to_ascii_lowercase()
}

/// First whitespace-delimited token of a message, with the remainder.
pub fn first_token(msg: &str) -> (&str, &str) {
    let msg = msg.trim_start_matches([' ', '\t']);
    match msg.find([' ', '\t', '\n']) {
        Some(idx) => (&msg[..idx], &msg[idx..]),
        None => (msg, ""),
    }
}

/// Extract an embedded `[flags:XYZ]` marker from a status message.
pub fn extract_flags(msg: &str) -> Option<String> {
    let start = msg.find("[flags:")? + "[flags:".len();
    let end = msg[start..].find(']')? + start;
    Some(msg[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nlencode_roundtrip() {
        let text = "line one\nline two|field\ttab\\slash\r";
        let encoded = nlencode(text);
        assert!(!encoded.contains('\n'));
        assert!(!encoded.contains('|'));
        assert_eq!(nldecode(&encoded), text);
    }

    #[test]
    fn test_nldecode_passes_unknown_escape() {
        assert_eq!(nldecode("a\\qb"), "a\\qb");
        assert_eq!(nldecode("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_record_header() {
        let hdr = record_header("stachg", 42, "www.example.com", (1700000000, 123), "10.0.0.1");
        assert_eq!(hdr, "@@stachg#42/www.example.com|1700000000.000123|10.0.0.1");
    }

    #[test]
    fn test_split_host_test() {
        assert_eq!(
            split_host_test("myhost.disk"),
            Some(("myhost".to_string(), "disk".to_string()))
        );
        // Commas carry embedded dots in the hostname
        assert_eq!(
            split_host_test("www,example,com.http"),
            Some(("www.example.com".to_string(), "http".to_string()))
        );
        assert_eq!(split_host_test("nodot"), None);
        assert_eq!(split_host_test(".disk"), None);
        assert_eq!(split_host_test("host."), None);
    }

    #[test]
    fn test_first_token() {
        let (tok, rest) = first_token("status+45 myhost.disk red\nbody");
        assert_eq!(tok, "status+45");
        assert_eq!(rest, " myhost.disk red\nbody");
        let (tok, rest) = first_token("ping");
        assert_eq!(tok, "ping");
        assert_eq!(rest, "");
    }

    #[test]
    fn test_extract_flags() {
        assert_eq!(
            extract_flags("status host.conn green <!-- [flags:OD] -->\nup"),
            Some("OD".to_string())
        );
        assert_eq!(extract_flags("no flags here"), None);
    }
}
