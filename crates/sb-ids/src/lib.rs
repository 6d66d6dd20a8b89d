//! Composite identifier parsing and formatting for the Slack bridge.
//!
//! Every entity the bridge persists is keyed by a composite ID built from
//! Slack's own identifiers. The codecs here are pure: no I/O, no state.
//!
//! # Formats
//! - Message: `<team>-<channel>-<ts>` (exactly three dash-separated fields)
//! - Portal: `<team>-<channel>`; the channel `"@"` denotes the team's space
//! - Part: `file-<index>-<file id>`; the plain-text part is the empty string
//!
//! # Timestamps
//! Slack timestamps are dotted decimals (`"1700000123.000400"`). The
//! fractional digits are read literally as nanoseconds, with no scaling by
//! digit count. Ordering of bridged history depends on this: two timestamps
//! that differ only in the fraction must parse to distinct instants in the
//! same relative order as their string forms.

use chrono::{DateTime, TimeZone, Utc};
use std::convert::TryFrom;
use std::fmt;

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Identity of one Slack message as the bridge stores it.
///
/// `ts` is kept byte-for-byte as Slack sent it; it is the message's primary
/// key on the Slack side and must never be reformatted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId {
    pub team: String,
    pub channel: String,
    pub ts: String,
}

impl MessageId {
    pub fn new(team: &str, channel: &str, ts: &str) -> MessageId {
        MessageId {
            team: team.to_owned(),
            channel: channel.to_owned(),
            ts: ts.to_owned(),
        }
    }

    /// The portal this message belongs to.
    pub fn portal_key(&self) -> PortalKey {
        PortalKey {
            team: self.team.clone(),
            channel: self.channel.clone(),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}-{}", self.team, self.channel, self.ts)
    }
}

impl TryFrom<&str> for MessageId {
    type Error = &'static str;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 {
            return Err("Message ID must have exactly three fields");
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err("Message ID field is empty");
        }
        Ok(MessageId {
            team: parts[0].to_owned(),
            channel: parts[1].to_owned(),
            ts: parts[2].to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// PortalKey
// ---------------------------------------------------------------------------

/// Channel ID that stands for the team's space room rather than a channel.
pub const SPACE_CHANNEL: &str = "@";

/// Identity of one bridged conversation: `(team, channel)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortalKey {
    pub team: String,
    pub channel: String,
}

impl PortalKey {
    pub fn new(team: &str, channel: &str) -> PortalKey {
        PortalKey {
            team: team.to_owned(),
            channel: channel.to_owned(),
        }
    }

    /// The pseudo-portal standing for the team's space room.
    pub fn space(team: &str) -> PortalKey {
        PortalKey::new(team, SPACE_CHANNEL)
    }

    pub fn is_space(&self) -> bool {
        self.channel == SPACE_CHANNEL
    }
}

impl fmt::Display for PortalKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.team, self.channel)
    }
}

impl TryFrom<&str> for PortalKey {
    type Error = &'static str;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 2 {
            return Err("Portal key must have exactly two fields");
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err("Portal key field is empty");
        }
        Ok(PortalKey {
            team: parts[0].to_owned(),
            channel: parts[1].to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// PartId
// ---------------------------------------------------------------------------

/// Identity of one homeserver event within a multi-part message.
///
/// A Slack message decomposes into one event per file attachment plus an
/// optional text event. The text part has the empty ID so that single-part
/// messages keep the bare message key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartId {
    Text,
    File { index: usize, id: String },
}

impl PartId {
    pub fn file(index: usize, id: &str) -> PartId {
        PartId::File {
            index,
            id: id.to_owned(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, PartId::Text)
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PartId::Text => Ok(()),
            PartId::File { index, id } => write!(f, "file-{}-{}", index, id),
        }
    }
}

impl TryFrom<&str> for PartId {
    type Error = &'static str;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Ok(PartId::Text);
        }
        let mut parts = s.splitn(3, '-');
        let kind = parts.next().ok_or("Empty part ID")?;
        if kind != "file" {
            return Err("Unknown part type");
        }
        let index = parts
            .next()
            .ok_or("Part ID missing index")?
            .parse::<usize>()
            .map_err(|_| "Part index is not decimal")?;
        let id = parts.next().ok_or("Part ID missing file ID")?;
        if id.is_empty() {
            return Err("Part file ID is empty");
        }
        Ok(PartId::File {
            index,
            id: id.to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Slack timestamps
// ---------------------------------------------------------------------------

/// Parse a Slack dotted-decimal timestamp into an instant.
///
/// The fraction is interpreted literally as nanoseconds (`"1700.5"` is 1700
/// seconds + 5 ns, not 500 ms). Unparseable input falls back to now-UTC so
/// that a malformed event still sorts near the live edge instead of at the
/// epoch.
pub fn parse_slack_ts(ts: &str) -> DateTime<Utc> {
    parse_slack_ts_opt(ts).unwrap_or_else(Utc::now)
}

fn parse_slack_ts_opt(ts: &str) -> Option<DateTime<Utc>> {
    let (secs_str, nanos_str) = match ts.split_once('.') {
        Some((s, n)) => (s, n),
        None => (ts, "0"),
    };
    let secs: i64 = secs_str.parse().ok()?;
    let nanos: u32 = nanos_str.parse().ok()?;
    if nanos >= 1_000_000_000 {
        return None;
    }
    Utc.timestamp_opt(secs, nanos).single()
}

/// True when the string parses as a Slack timestamp without the fallback.
pub fn is_valid_slack_ts(ts: &str) -> bool {
    parse_slack_ts_opt(ts).is_some()
}

// ---------------------------------------------------------------------------
// User IDs
// ---------------------------------------------------------------------------

/// Fold a login ID (case-preserving) into the canonical user ID form.
///
/// Slack user IDs are matched case-insensitively on the homeserver side;
/// login IDs keep their original case for API calls.
pub fn fold_user_id(login_id: &str) -> String {
    login_id.to_lowercase()
}

/// Build the localpart suffix for a ghost: `<team>-<user>` lowercased.
pub fn ghost_localpart(team: &str, user: &str) -> String {
    fold_user_id(&format!("{}-{}", team, user))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn message_id_round_trip() {
        let id = MessageId::new("T123", "C456", "1700000123.000400");
        let s = id.to_string();
        assert_eq!(s, "T123-C456-1700000123.000400");
        assert_eq!(MessageId::try_from(s.as_str()).unwrap(), id);
    }

    #[test]
    fn message_id_requires_three_fields() {
        assert!(MessageId::try_from("T123-C456").is_err());
        assert!(MessageId::try_from("T123-C456-1.2-extra").is_err());
        assert!(MessageId::try_from("").is_err());
    }

    #[test]
    fn message_id_rejects_empty_fields() {
        assert!(MessageId::try_from("T123--1.2").is_err());
        assert!(MessageId::try_from("-C456-1.2").is_err());
    }

    #[test]
    fn message_ts_is_preserved_byte_for_byte() {
        let id = MessageId::try_from("T1-C1-1700000123.004500").unwrap();
        assert_eq!(id.ts, "1700000123.004500");
    }

    #[test]
    fn portal_key_round_trip() {
        let key = PortalKey::new("T123", "C456");
        assert_eq!(key.to_string(), "T123-C456");
        assert_eq!(PortalKey::try_from("T123-C456").unwrap(), key);
    }

    #[test]
    fn space_portal_key() {
        let key = PortalKey::space("T123");
        assert_eq!(key.to_string(), "T123-@");
        assert!(key.is_space());
        assert!(!PortalKey::new("T123", "C456").is_space());
    }

    #[test]
    fn part_id_text_is_empty_string() {
        assert_eq!(PartId::Text.to_string(), "");
        assert_eq!(PartId::try_from("").unwrap(), PartId::Text);
    }

    #[test]
    fn part_id_file_round_trip() {
        let part = PartId::file(2, "F0123ABC");
        assert_eq!(part.to_string(), "file-2-F0123ABC");
        assert_eq!(PartId::try_from("file-2-F0123ABC").unwrap(), part);
    }

    #[test]
    fn part_id_rejects_unknown_type() {
        assert!(PartId::try_from("image-0-F1").is_err());
        assert!(PartId::try_from("file-x-F1").is_err());
        assert!(PartId::try_from("file-0-").is_err());
    }

    #[test]
    fn slack_ts_parses_literal_nanos() {
        let dt = parse_slack_ts("1700000123.000400");
        assert_eq!(dt.timestamp(), 1_700_000_123);
        assert_eq!(dt.timestamp_subsec_nanos(), 400);
    }

    #[test]
    fn slack_ts_without_fraction() {
        let dt = parse_slack_ts("1700000123");
        assert_eq!(dt.timestamp(), 1_700_000_123);
        assert_eq!(dt.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn slack_ts_ordering_follows_string_fraction() {
        let a = parse_slack_ts("1700.000001");
        let b = parse_slack_ts("1700.000002");
        assert!(a < b);
    }

    #[test]
    fn unparseable_ts_falls_back_to_now() {
        let before = Utc::now();
        let dt = parse_slack_ts("not-a-timestamp");
        let after = Utc::now();
        assert!(dt >= before && dt <= after);
        assert!(!is_valid_slack_ts("not-a-timestamp"));
        assert!(is_valid_slack_ts("1700.0"));
    }

    #[test]
    fn user_id_case_folding() {
        assert_eq!(fold_user_id("U0123ABC"), "u0123abc");
        assert_eq!(ghost_localpart("T1", "U2ABC"), "t1-u2abc");
    }
}
