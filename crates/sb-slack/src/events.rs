//! Streaming event types.
//!
//! All RTM / socket-mode events use a top-level `type` field for
//! discriminated deserialization. The enum is closed: kinds the bridge does
//! not handle fall into `Unknown` and are logged by the session reader,
//! never treated as fatal.

use crate::blocks::Block;
use crate::types::{Attachment, Conversation, File, MessageItem};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level discriminated union
// ---------------------------------------------------------------------------

/// All streaming event kinds the bridge consumes.
///
/// ```json
/// { "type": "message", "subtype": "message_changed", ... }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    Hello(HelloEvent),
    Message(MessageEvent),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    UserTyping(TypingEvent),
    ChannelMarked(ChannelMarkedEvent),
    ChannelJoined(ChannelLifecycleEvent),
    ChannelLeft(ChannelRefEvent),
    GroupJoined(ChannelLifecycleEvent),
    GroupLeft(ChannelRefEvent),
    MemberJoinedChannel(MemberEvent),
    MemberLeftChannel(MemberEvent),
    ChannelRename(ChannelRenameEvent),
    EmojiChanged(EmojiChangedEvent),
    Error(ErrorEvent),
    Goodbye(GoodbyeEvent),
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HelloEvent {}

/// Server-side notice that the connection will close; reconnect expected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoodbyeEvent {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A live `message` event, covering every subtype the bridge routes.
///
/// For `message_changed` the new content is in `message` and the old in
/// `previous_message`; for `message_deleted` only `deleted_ts` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Box<MessageItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_message: Option<Box<MessageItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_ts: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub is_ephemeral: bool,
}

impl MessageEvent {
    /// Author per the resolution order: user ID, bot ID, then the nested
    /// message's user ID. `None` means the message must be dropped.
    pub fn author(&self) -> Option<&str> {
        self.user
            .as_deref()
            .or(self.bot_id.as_deref())
            .or_else(|| self.message.as_ref().and_then(|m| m.author()))
    }

    pub fn subtype(&self) -> &str {
        self.subtype.as_deref().unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactionEvent {
    #[serde(default)]
    pub user: String,
    /// Shortcode without colons, possibly with a skin-tone suffix.
    #[serde(default)]
    pub reaction: String,
    #[serde(default)]
    pub item: ReactionItem,
    #[serde(default)]
    pub event_ts: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactionItem {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub ts: String,
}

// ---------------------------------------------------------------------------
// Presence-adjacent events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypingEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: String,
}

/// Read-marker movement for the authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMarkedEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub ts: String,
}

// ---------------------------------------------------------------------------
// Channel membership / metadata
// ---------------------------------------------------------------------------

/// Joined events carry the full conversation object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelLifecycleEvent {
    #[serde(default)]
    pub channel: Conversation,
}

/// Left events carry only the channel ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelRefEvent {
    #[serde(default)]
    pub channel: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelRenameEvent {
    #[serde(default)]
    pub channel: RenamedChannel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenamedChannel {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

// ---------------------------------------------------------------------------
// Emoji
// ---------------------------------------------------------------------------

/// Any change to the team emoji set invalidates the cached list; the bridge
/// resyncs rather than applying the delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmojiChangedEvent {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub names: Vec<String>,
}

impl SlackEvent {
    /// Channel the event targets, for routing to a portal queue.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            SlackEvent::Message(m) => Some(&m.channel),
            SlackEvent::ReactionAdded(r) | SlackEvent::ReactionRemoved(r) => {
                Some(&r.item.channel)
            }
            SlackEvent::UserTyping(t) => Some(&t.channel),
            SlackEvent::ChannelMarked(m) => Some(&m.channel),
            SlackEvent::ChannelJoined(c) | SlackEvent::GroupJoined(c) => Some(&c.channel.id),
            SlackEvent::ChannelLeft(c) | SlackEvent::GroupLeft(c) => Some(&c.channel),
            SlackEvent::MemberJoinedChannel(m) | SlackEvent::MemberLeftChannel(m) => {
                Some(&m.channel)
            }
            SlackEvent::ChannelRename(r) => Some(&r.channel.id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_deserializes() {
        let json = r#"{"type":"message","channel":"C1","user":"U1","ts":"1700.000100","text":"hello"}"#;
        let event: SlackEvent = serde_json::from_str(json).unwrap();
        let SlackEvent::Message(msg) = event else {
            panic!("expected message");
        };
        assert_eq!(msg.channel, "C1");
        assert_eq!(msg.author(), Some("U1"));
        assert_eq!(msg.subtype(), "");
    }

    #[test]
    fn message_changed_carries_nested_message() {
        let json = r#"{
            "type": "message", "subtype": "message_changed", "channel": "C1",
            "ts": "1800.0",
            "message": {"ts": "1700.0", "user": "U1", "text": "edited"},
            "previous_message": {"ts": "1700.0", "user": "U1", "text": "original"}
        }"#;
        let event: SlackEvent = serde_json::from_str(json).unwrap();
        let SlackEvent::Message(msg) = event else {
            panic!("expected message");
        };
        assert_eq!(msg.subtype(), "message_changed");
        assert_eq!(msg.message.as_ref().unwrap().text, "edited");
        // Author falls through to the nested message.
        assert_eq!(msg.author(), Some("U1"));
    }

    #[test]
    fn bot_author_resolution() {
        let msg = MessageEvent {
            bot_id: Some("B9".into()),
            ..MessageEvent::default()
        };
        assert_eq!(msg.author(), Some("B9"));
        assert_eq!(MessageEvent::default().author(), None);
    }

    #[test]
    fn reaction_event_routes_by_item_channel() {
        let json = r#"{
            "type": "reaction_added", "user": "U2", "reaction": "smile",
            "item": {"type": "message", "channel": "C7", "ts": "1700.0"},
            "event_ts": "1701.0"
        }"#;
        let event: SlackEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.channel_id(), Some("C7"));
    }

    #[test]
    fn unknown_event_type_is_tolerated() {
        let event: SlackEvent =
            serde_json::from_str(r#"{"type":"pref_change","name":"x"}"#).unwrap();
        assert_eq!(event, SlackEvent::Unknown);
        assert_eq!(event.channel_id(), None);
    }
}
