//! HTTP response head parsing shared by the transports.

/// A parsed `HTTP/x.y CODE REASON` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub protocol_version: String,
    pub status: u16,
    pub reason: String,
}

/// Parse a status line. Trailing CR/LF is ignored; the reason may be empty.
pub fn parse_status_line(line: &str) -> Option<StatusLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(3, ' ');
    let protocol = parts.next()?.strip_prefix("HTTP/")?;
    let status = parts.next()?.trim().parse::<u16>().ok()?;
    let reason = parts.next().unwrap_or("").trim().to_string();
    Some(StatusLine {
        protocol_version: protocol.to_string(),
        status,
        reason,
    })
}

/// Split a `Name: value` line. Whitespace around both parts is dropped.
pub fn parse_header_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.trim_end_matches(['\r', '\n']).split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}
