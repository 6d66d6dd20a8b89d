//! Slack REST object types.
//!
//! Field names mirror the wire format; everything optional on the wire is
//! `Option` or defaulted so partial objects from older endpoints still
//! deserialize.

use crate::blocks::Block;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// A channel, group DM, or IM as returned by `conversations.info` / `.list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_channel: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default)]
    pub is_mpim: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_archived: bool,
    /// IM peer user ID (IMs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<ChannelText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<ChannelText>,
    /// Timestamp of the latest message, when the endpoint includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<LatestRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_members: Option<u32>,
}

/// Topic/purpose wrapper (`{ "value": ..., "creator": ..., "last_set": ... }`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelText {
    #[serde(default)]
    pub value: String,
}

/// The `latest` field of a conversation; only the timestamp matters here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestRef {
    #[serde(default)]
    pub ts: String,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A workspace member as returned by `users.info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub profile: UserProfile,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub image_512: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
}

impl UserInfo {
    /// Preferred display name: profile display name, real name, then handle.
    pub fn display_name(&self) -> &str {
        if !self.profile.display_name.is_empty() {
            &self.profile.display_name
        } else if !self.real_name.is_empty() {
            &self.real_name
        } else {
            &self.name
        }
    }
}

// ---------------------------------------------------------------------------
// Team
// ---------------------------------------------------------------------------

/// Workspace metadata from `team.info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub icon: TeamIcon,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamIcon {
    #[serde(default)]
    pub image_230: String,
    #[serde(default)]
    pub image_default: bool,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// A file attachment on a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub mimetype: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub url_private: String,
    /// `"slack_audio"` marks voice notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub mode: String,
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Legacy message attachment: either a message unfurl or a generic card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub fallback: String,
    #[serde(default)]
    pub pretext: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_link: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub title_link: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub fields: Vec<AttachmentField>,
    #[serde(default)]
    pub footer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<serde_json::Value>,
    /// Message-unfurl marker and payload.
    #[serde(default)]
    pub is_msg_unfurl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub message_blocks: Vec<AttachmentMessageBlocks>,
    #[serde(default)]
    pub from_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentField {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub short: bool,
}

/// Wrapper for unfurled message content inside an attachment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMessageBlocks {
    #[serde(default)]
    pub message: AttachmentMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMessage {
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl Attachment {
    /// Attachment timestamp as a Slack ts string, if present.
    ///
    /// Slack sends either a string (`"1700000000.000100"`) or a bare integer
    /// depending on the producer.
    pub fn ts_string(&self) -> Option<String> {
        match &self.ts {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages (history items)
// ---------------------------------------------------------------------------

/// A message as stored in conversation history and nested inside edit events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageItem {
    #[serde(default)]
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub files: Vec<File>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

impl MessageItem {
    /// Author per the bridge's resolution order: user, then bot.
    pub fn author(&self) -> Option<&str> {
        self.user.as_deref().or(self.bot_id.as_deref())
    }

    /// True when this message is a reply inside a thread (not the root).
    pub fn is_thread_reply(&self) -> bool {
        match &self.thread_ts {
            Some(root) => *root != self.ts,
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// REST envelopes
// ---------------------------------------------------------------------------

/// History page from `conversations.history` / `.replies`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub messages: Vec<MessageItem>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub response_metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: String,
}

/// Result of posting or updating a message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostMessageResponse {
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub channel: String,
}

/// Per-conversation counts from `client.counts`, used to seed read state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationCounts {
    pub id: String,
    #[serde(default)]
    pub last_read: String,
    #[serde(default)]
    pub latest: String,
    #[serde(default)]
    pub mention_count: u32,
    #[serde(default)]
    pub has_unreads: bool,
}

/// Boot payload for `xoxs-` sessions: full channel + IM lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientBoot {
    #[serde(default)]
    pub channels: Vec<Conversation>,
    #[serde(default)]
    pub ims: Vec<Conversation>,
}

/// Completed three-step upload descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadUrl {
    pub upload_url: String,
    pub file_id: String,
}

/// Share info returned by single-shot uploads: channel → share entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileShares {
    #[serde(default)]
    pub private: std::collections::HashMap<String, Vec<ShareEntry>>,
    #[serde(default)]
    pub public: std::collections::HashMap<String, Vec<ShareEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShareEntry {
    #[serde(default)]
    pub ts: String,
}

/// One custom emoji entry from `emoji.list`: either an image URL or an
/// `alias:<name>` redirect.
pub type EmojiMap = std::collections::HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_classification_fields_deserialize() {
        let convo: Conversation = serde_json::from_str(
            r#"{"id":"D123","is_im":true,"user":"U456","is_private":true}"#,
        )
        .unwrap();
        assert!(convo.is_im);
        assert_eq!(convo.user.as_deref(), Some("U456"));
        assert!(convo.name.is_empty());
    }

    #[test]
    fn user_display_name_preference_order() {
        let mut user = UserInfo {
            id: "U1".into(),
            name: "handle".into(),
            real_name: "Real Name".into(),
            ..UserInfo::default()
        };
        assert_eq!(user.display_name(), "Real Name");
        user.profile.display_name = "Display".into();
        assert_eq!(user.display_name(), "Display");
        user.profile.display_name.clear();
        user.real_name.clear();
        assert_eq!(user.display_name(), "handle");
    }

    #[test]
    fn attachment_ts_accepts_string_or_number() {
        let a: Attachment = serde_json::from_str(r#"{"ts":"1700.000100"}"#).unwrap();
        assert_eq!(a.ts_string().as_deref(), Some("1700.000100"));
        let b: Attachment = serde_json::from_str(r#"{"ts":1700}"#).unwrap();
        assert_eq!(b.ts_string().as_deref(), Some("1700"));
        let c: Attachment = serde_json::from_str("{}").unwrap();
        assert_eq!(c.ts_string(), None);
    }

    #[test]
    fn thread_reply_detection() {
        let root = MessageItem {
            ts: "1700.0".into(),
            thread_ts: Some("1700.0".into()),
            ..MessageItem::default()
        };
        assert!(!root.is_thread_reply());
        let reply = MessageItem {
            ts: "1800.0".into(),
            thread_ts: Some("1700.0".into()),
            ..MessageItem::default()
        };
        assert!(reply.is_thread_reply());
    }
}
