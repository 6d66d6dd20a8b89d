//! Event content structs with the frozen wire field names.

use crate::{ContentUri, EventId, Mxid};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

pub const MSGTYPE_TEXT: &str = "m.text";
pub const MSGTYPE_NOTICE: &str = "m.notice";
pub const MSGTYPE_EMOTE: &str = "m.emote";
pub const MSGTYPE_IMAGE: &str = "m.image";
pub const MSGTYPE_FILE: &str = "m.file";
pub const MSGTYPE_AUDIO: &str = "m.audio";
pub const MSGTYPE_VIDEO: &str = "m.video";

pub const FORMAT_HTML: &str = "org.matrix.custom.html";

// ---------------------------------------------------------------------------
// m.room.message content
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    pub msgtype: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<ContentUri>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<FileInfo>,
    #[serde(
        rename = "m.relates_to",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub relates_to: Option<RelatesTo>,
    #[serde(
        rename = "m.new_content",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub new_content: Option<Box<MessageContent>>,
    #[serde(
        rename = "m.mentions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub mentions: Option<Mentions>,
    /// Marks bridged voice notes (`slack_audio` file subtype).
    #[serde(
        rename = "fi.mau.slack.audio",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub slack_audio: bool,
}

impl MessageContent {
    pub fn text(body: &str) -> MessageContent {
        MessageContent {
            msgtype: MSGTYPE_TEXT.to_owned(),
            body: body.to_owned(),
            ..MessageContent::default()
        }
    }

    pub fn notice(body: &str) -> MessageContent {
        MessageContent {
            msgtype: MSGTYPE_NOTICE.to_owned(),
            body: body.to_owned(),
            ..MessageContent::default()
        }
    }

    pub fn html(body: &str, formatted: &str) -> MessageContent {
        MessageContent {
            msgtype: MSGTYPE_TEXT.to_owned(),
            body: body.to_owned(),
            format: Some(FORMAT_HTML.to_owned()),
            formatted_body: Some(formatted.to_owned()),
            ..MessageContent::default()
        }
    }

    /// Wrap this content as an edit of `target`.
    ///
    /// The outer body gets the `* ` fallback prefix; mentions are cleared on
    /// the outer content so edits do not re-ping everyone from the original.
    pub fn into_edit_of(mut self, target: &EventId) -> MessageContent {
        let inner = self.clone();
        self.new_content = Some(Box::new(inner));
        self.relates_to = Some(RelatesTo::replace(target));
        self.body = format!("* {}", self.body);
        if let Some(formatted) = &mut self.formatted_body {
            *formatted = format!("* {}", formatted);
        }
        self.mentions = Some(Mentions::default());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mentions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<Mxid>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub room: bool,
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

/// One shape covers replace, thread, and annotation relations; constructors
/// keep the field combinations honest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatesTo {
    #[serde(
        rename = "rel_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rel_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(
        rename = "is_falling_back",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_falling_back: bool,
    #[serde(
        rename = "m.in_reply_to",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub in_reply_to: Option<InReplyTo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InReplyTo {
    pub event_id: EventId,
}

impl RelatesTo {
    pub fn replace(target: &EventId) -> RelatesTo {
        RelatesTo {
            rel_type: Some("m.replace".to_owned()),
            event_id: Some(target.clone()),
            ..RelatesTo::default()
        }
    }

    /// Thread relation rooted at `root`, with the reply fallback pointing at
    /// `latest` (the newest event in the thread).
    pub fn thread(root: &EventId, latest: &EventId) -> RelatesTo {
        RelatesTo {
            rel_type: Some("m.thread".to_owned()),
            event_id: Some(root.clone()),
            is_falling_back: true,
            in_reply_to: Some(InReplyTo {
                event_id: latest.clone(),
            }),
            ..RelatesTo::default()
        }
    }

    pub fn annotation(target: &EventId, key: &str) -> RelatesTo {
        RelatesTo {
            rel_type: Some("m.annotation".to_owned()),
            event_id: Some(target.clone()),
            key: Some(key.to_owned()),
            ..RelatesTo::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

/// `m.reaction` content with the custom-emoji introspection extras.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactionContent {
    #[serde(rename = "m.relates_to")]
    pub relates_to: RelatesTo,
    #[serde(
        rename = "fi.mau.slack.reaction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub slack_reaction: Option<SlackReactionInfo>,
    #[serde(
        rename = "com.beeper.reaction.shortcode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub shortcode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackReactionInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mxc: Option<ContentUri>,
}

// ---------------------------------------------------------------------------
// Bridge info state
// ---------------------------------------------------------------------------

pub const BRIDGE_INFO_TYPE: &str = "uk.half-shot.bridge";
pub const BRIDGE_PROTOCOL_ID: &str = "slackgo";

/// State key: `fi.mau.slack://slackgo/<team>[/<channel>]`.
pub fn bridge_info_state_key(team: &str, channel: Option<&str>) -> String {
    match channel {
        Some(channel) => format!("fi.mau.slack://{}/{}/{}", BRIDGE_PROTOCOL_ID, team, channel),
        None => format!("fi.mau.slack://{}/{}", BRIDGE_PROTOCOL_ID, team),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeInfoContent {
    pub bridgebot: Mxid,
    pub creator: Mxid,
    pub protocol: BridgeInfoSection,
    pub network: BridgeInfoSection,
    pub channel: BridgeInfoSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeInfoSection {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<ContentUri>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_wraps_new_content_and_clears_mentions() {
        let mut content = MessageContent::text("fixed");
        content.mentions = Some(Mentions {
            user_ids: vec!["@ghost:example.org".to_owned()],
            room: false,
        });
        let edit = content.into_edit_of(&"$orig".to_owned());
        assert_eq!(edit.body, "* fixed");
        assert_eq!(edit.new_content.as_ref().unwrap().body, "fixed");
        assert_eq!(
            edit.relates_to.as_ref().unwrap().rel_type.as_deref(),
            Some("m.replace")
        );
        // Outer mentions emptied; inner keeps the original list.
        assert!(edit.mentions.as_ref().unwrap().user_ids.is_empty());
        assert_eq!(
            edit.new_content.as_ref().unwrap().mentions.as_ref().unwrap().user_ids.len(),
            1
        );
    }

    #[test]
    fn thread_relation_shape() {
        let rel = RelatesTo::thread(&"$root".to_owned(), &"$latest".to_owned());
        let json = serde_json::to_value(&rel).unwrap();
        assert_eq!(json["rel_type"], "m.thread");
        assert_eq!(json["event_id"], "$root");
        assert_eq!(json["is_falling_back"], true);
        assert_eq!(json["m.in_reply_to"]["event_id"], "$latest");
    }

    #[test]
    fn bridge_info_state_keys() {
        assert_eq!(
            bridge_info_state_key("T1", None),
            "fi.mau.slack://slackgo/T1"
        );
        assert_eq!(
            bridge_info_state_key("T1", Some("C2")),
            "fi.mau.slack://slackgo/T1/C2"
        );
    }

    #[test]
    fn reaction_content_serializes_extras() {
        let content = ReactionContent {
            relates_to: RelatesTo::annotation(&"$msg".to_owned(), "😄"),
            slack_reaction: Some(SlackReactionInfo {
                name: ":smile:".to_owned(),
                mxc: None,
            }),
            shortcode: Some(":smile:".to_owned()),
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["m.relates_to"]["key"], "😄");
        assert_eq!(json["fi.mau.slack.reaction"]["name"], ":smile:");
        assert_eq!(json["com.beeper.reaction.shortcode"], ":smile:");
    }
}
