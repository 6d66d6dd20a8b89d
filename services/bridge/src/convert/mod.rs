//! Bidirectional message conversion.
//!
//! `to_matrix` renders Slack blocks and attachments into homeserver message
//! parts; `to_slack` turns homeserver events into Slack send requests,
//! parsing Matrix HTML into a rich-text block tree. Both directions share
//! the converter context, which carries the collaborators but no mutable
//! state of its own.

pub mod html;
pub mod mrkdwn;
pub mod to_matrix;
pub mod to_slack;
pub mod urls;

use crate::config::PortalConfig;
use crate::db::Db;
use crate::emoji::EmojiCache;
use crate::puppets::Puppets;
use sb_ids::PartId;
use sb_matrix::{Homeserver, MessageContent};
use sb_slack::SlackClient;
use sb_slack::blocks::Block;
use sb_slack::types::{Attachment, File};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("edit target not found")]
    EditTargetNotFound,
    /// Editing a media-only message needs a caption distinct from the
    /// filename; there is nothing to update otherwise.
    #[error("media message has no caption to edit")]
    MediaOnlyEditCaption,
    #[error("thread root not found")]
    ThreadRootNotFound,
    #[error("media upload failed: {0}")]
    MediaUploadFailed(String),
    #[error("media download failed: {0}")]
    MediaDownloadFailed(String),
    #[error("unsupported message type: {0}")]
    UnsupportedMessage(String),
}

// ---------------------------------------------------------------------------
// Converter context
// ---------------------------------------------------------------------------

/// Borrowed collaborator bundle for one conversion. Cheap to build per event.
pub struct Converter<'a> {
    pub db: &'a Db,
    pub client: &'a dyn SlackClient,
    pub homeserver: &'a dyn Homeserver,
    pub emoji: &'a EmojiCache,
    pub puppets: &'a Puppets,
    pub config: &'a PortalConfig,
    pub team_id: &'a str,
    pub channel_id: &'a str,
}

impl Converter<'_> {
    /// Reverse the username template: ghost MXID → Slack user ID.
    ///
    /// Slack user IDs are uppercase on the wire; the ghost localpart is the
    /// case-folded form, so the extracted ID is uppercased again.
    pub fn parse_ghost_mxid(&self, mxid: &str) -> Option<String> {
        let localpart = mxid
            .strip_prefix('@')?
            .split(':')
            .next()?;
        let placeholder = "{userid}";
        let template = &self.config.username_template;
        let at = template.find(placeholder)?;
        let (prefix, suffix) = (&template[..at], &template[at + placeholder.len()..]);
        let middle = localpart.strip_prefix(prefix)?.strip_suffix(suffix)?;
        let team_prefix = format!("{}-", self.team_id.to_lowercase());
        let user = middle.strip_prefix(&team_prefix)?;
        if user.is_empty() {
            return None;
        }
        Some(user.to_uppercase())
    }
}

// ---------------------------------------------------------------------------
// Slack → Matrix output
// ---------------------------------------------------------------------------

/// One homeserver event to emit for a Slack message.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedPart {
    pub part_id: PartId,
    pub part_index: i64,
    pub content: MessageContent,
}

/// Uniform view over live message events and history items.
#[derive(Debug, Clone, Copy)]
pub struct SlackMessage<'a> {
    pub ts: &'a str,
    pub text: &'a str,
    pub blocks: &'a [Block],
    pub files: &'a [File],
    pub attachments: &'a [Attachment],
}

impl<'a> SlackMessage<'a> {
    pub fn from_event(event: &'a sb_slack::events::MessageEvent) -> SlackMessage<'a> {
        SlackMessage {
            ts: &event.ts,
            text: &event.text,
            blocks: &event.blocks,
            files: &event.files,
            attachments: &event.attachments,
        }
    }

    pub fn from_item(item: &'a sb_slack::types::MessageItem) -> SlackMessage<'a> {
        SlackMessage {
            ts: &item.ts,
            text: &item.text,
            blocks: &item.blocks,
            files: &item.files,
            attachments: &item.attachments,
        }
    }
}

// ---------------------------------------------------------------------------
// Matrix → Slack output
// ---------------------------------------------------------------------------

/// What the portal should send to Slack for one homeserver event.
#[derive(Debug, Clone, PartialEq)]
pub enum SlackSendRequest {
    /// `chat.postMessage` with a rich-text block (or plain text).
    Message {
        text: String,
        blocks: Vec<Block>,
        thread_ts: Option<String>,
    },
    /// File upload bound to the channel (and thread).
    FileUpload {
        filename: String,
        data: Vec<u8>,
        mime: String,
        /// Voice-note flag (`slack_audio` subtype on the Slack side).
        voice: bool,
        /// Caption distinct from the filename, sent as a follow-up message.
        caption: Option<String>,
        thread_ts: Option<String>,
    },
    /// `chat.update` replacing the given message.
    Edit {
        ts: String,
        text: String,
        blocks: Vec<Block>,
    },
}
