//! Homeserver → Slack conversion.
//!
//! Resolves edit targets and thread roots against the message store, parses
//! HTML bodies into rich-text blocks, and downloads media for re-upload.

use super::html::{parse_html, plain_text_section};
use super::{ConvertError, Converter, SlackSendRequest};
use crate::db;
use sb_matrix::MessageContent;
use sb_matrix::content::{MSGTYPE_AUDIO, MSGTYPE_FILE, MSGTYPE_IMAGE, MSGTYPE_VIDEO};
use sb_slack::blocks::{Block, RichTextBlock};

/// Convert one `m.room.message` (or sticker) content into a send request.
pub async fn matrix_to_slack(
    conv: &Converter<'_>,
    content: &MessageContent,
) -> Result<SlackSendRequest, ConvertError> {
    // Replacement events carry the real content in m.new_content.
    if let Some(relates) = &content.relates_to {
        if relates.rel_type.as_deref() == Some("m.replace") {
            let target = relates
                .event_id
                .as_ref()
                .ok_or(ConvertError::EditTargetNotFound)?;
            let inner = content.new_content.as_deref().unwrap_or(content);
            return convert_edit(conv, target, inner);
        }
    }

    let thread_ts = resolve_thread(conv, content)?;

    if is_media(&content.msgtype) {
        return convert_media(conv, content, thread_ts).await;
    }

    let blocks = body_blocks(conv, content);
    Ok(SlackSendRequest::Message {
        text: content.body.clone(),
        blocks,
        thread_ts,
    })
}

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

fn convert_edit(
    conv: &Converter<'_>,
    target: &str,
    inner: &MessageContent,
) -> Result<SlackSendRequest, ConvertError> {
    let row = db::message::get_by_mxid(conv.db, target)
        .map_err(|_| ConvertError::EditTargetNotFound)?
        .ok_or(ConvertError::EditTargetNotFound)?;
    if row.team_id != conv.team_id || row.channel_id != conv.channel_id {
        return Err(ConvertError::EditTargetNotFound);
    }

    if !row.part_id.is_empty() {
        // Media part: the edit can only update the caption, and only when a
        // caption distinct from the filename exists.
        let filename = inner
            .filename
            .as_deref()
            .ok_or(ConvertError::MediaOnlyEditCaption)?;
        if inner.body == filename {
            return Err(ConvertError::MediaOnlyEditCaption);
        }
    }

    let blocks = body_blocks(conv, inner);
    Ok(SlackSendRequest::Edit {
        ts: row.message_ts,
        text: inner.body.clone(),
        blocks,
    })
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

/// Thread timestamp for the outgoing message.
///
/// The explicit thread relation wins; an unresolvable thread target is an
/// error. A bare reply-to falls back to threading on the replied-to message
/// when it is known, and sends unthreaded when it is not.
fn resolve_thread(
    conv: &Converter<'_>,
    content: &MessageContent,
) -> Result<Option<String>, ConvertError> {
    let Some(relates) = &content.relates_to else {
        return Ok(None);
    };
    if relates.rel_type.as_deref() == Some("m.thread") {
        let root = relates
            .event_id
            .as_ref()
            .ok_or(ConvertError::ThreadRootNotFound)?;
        let row = db::message::get_by_mxid(conv.db, root)
            .map_err(|_| ConvertError::ThreadRootNotFound)?
            .ok_or(ConvertError::ThreadRootNotFound)?;
        let ts = if row.thread_root_ts.is_empty() {
            row.message_ts
        } else {
            row.thread_root_ts
        };
        return Ok(Some(ts));
    }
    if let Some(reply) = &relates.in_reply_to {
        if let Ok(Some(row)) = db::message::get_by_mxid(conv.db, &reply.event_id) {
            let ts = if row.thread_root_ts.is_empty() {
                row.message_ts
            } else {
                row.thread_root_ts
            };
            return Ok(Some(ts));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

fn is_media(msgtype: &str) -> bool {
    matches!(
        msgtype,
        MSGTYPE_IMAGE | MSGTYPE_FILE | MSGTYPE_AUDIO | MSGTYPE_VIDEO
    )
}

async fn convert_media(
    conv: &Converter<'_>,
    content: &MessageContent,
    thread_ts: Option<String>,
) -> Result<SlackSendRequest, ConvertError> {
    let url = content
        .url
        .as_ref()
        .ok_or_else(|| ConvertError::UnsupportedMessage("media without url".to_owned()))?;
    let data = conv
        .homeserver
        .download_media(url)
        .await
        .map_err(|e| ConvertError::MediaDownloadFailed(e.to_string()))?;

    let filename = content
        .filename
        .clone()
        .unwrap_or_else(|| content.body.clone());
    let mime = content
        .info
        .as_ref()
        .and_then(|i| i.mimetype.clone())
        .unwrap_or_else(|| "application/octet-stream".to_owned());
    // Voice notes would be transcoded to WebM/Opus here when an external
    // encoder is configured; without one the original bytes go through.
    let voice = content.msgtype == MSGTYPE_AUDIO && content.slack_audio;
    let caption = content
        .filename
        .as_ref()
        .filter(|f| **f != content.body)
        .map(|_| content.body.clone());

    Ok(SlackSendRequest::FileUpload {
        filename,
        data,
        mime,
        voice,
        caption,
        thread_ts,
    })
}

// ---------------------------------------------------------------------------
// Body conversion
// ---------------------------------------------------------------------------

fn body_blocks(conv: &Converter<'_>, content: &MessageContent) -> Vec<Block> {
    let sections = match &content.formatted_body {
        Some(html) => parse_html(conv, html),
        None => plain_text_section(&content.body),
    };
    if sections.is_empty() {
        return Vec::new();
    }
    vec![Block::RichText(RichTextBlock { elements: sections })]
}
