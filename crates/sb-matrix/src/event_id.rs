//! Deterministic event IDs for batched history.
//!
//! Batched historical-send endpoints are idempotent only when the caller
//! supplies the event IDs, so backfill re-runs must regenerate the exact
//! same ID for the same message part:
//!
//! `$<base64url(sha256("<room>/slack/<team>/<channel>/<ts>/<part>"))>:slack.com`

use crate::{EventId, RoomId};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Compute the deterministic event ID for one message part.
pub fn deterministic_event_id(
    room: &RoomId,
    team: &str,
    channel: &str,
    ts: &str,
    part_id: &str,
) -> EventId {
    let input = format!("{}/slack/{}/{}/{}/{}", room, team, channel, ts, part_id);
    let hash = Sha256::digest(input.as_bytes());
    format!("${}:slack.com", URL_SAFE_NO_PAD.encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recomputation_is_stable() {
        let a = deterministic_event_id(
            &"!room:example.org".to_owned(),
            "T1",
            "C2",
            "1700.000100",
            "",
        );
        let b = deterministic_event_id(
            &"!room:example.org".to_owned(),
            "T1",
            "C2",
            "1700.000100",
            "",
        );
        assert_eq!(a, b);
        assert!(a.starts_with('$'));
        assert!(a.ends_with(":slack.com"));
    }

    #[test]
    fn distinct_inputs_give_distinct_ids() {
        let room = "!room:example.org".to_owned();
        let text = deterministic_event_id(&room, "T1", "C2", "1700.000100", "");
        let file = deterministic_event_id(&room, "T1", "C2", "1700.000100", "file-0-F1");
        let other_ts = deterministic_event_id(&room, "T1", "C2", "1700.000200", "");
        assert_ne!(text, file);
        assert_ne!(text, other_ts);
    }

    #[test]
    fn id_is_url_safe_base64_of_sha256() {
        let id = deterministic_event_id(&"!r:x".to_owned(), "T", "C", "1.0", "");
        let encoded = id
            .strip_prefix('$')
            .and_then(|s| s.strip_suffix(":slack.com"))
            .unwrap();
        // 32 hash bytes encode to 43 unpadded base64url chars.
        assert_eq!(encoded.len(), 43);
        assert!(URL_SAFE_NO_PAD.decode(encoded).is_ok());
    }
}
