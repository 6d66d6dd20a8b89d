//! Homeserver → Slack event handling for one portal.

use super::{MatrixEvent, Portal, SessionHandle};
use crate::convert::to_slack::matrix_to_slack;
use crate::convert::{ConvertError, Converter, SlackSendRequest};
use crate::db::{self, MessageRow, ReactionRow};
use crate::emoji::shortcode_for_unicode;
use crate::error::BridgeError;
use sb_matrix::{EventId, MessageContent};
use sb_slack::client::{PostMessageRequest, UpdateMessageRequest};
use sb_slack::http::share_ts;
use tracing::{debug, warn};

pub async fn handle_matrix_event(
    portal: &Portal,
    session: &SessionHandle,
    event: MatrixEvent,
) -> Result<(), BridgeError> {
    match event {
        MatrixEvent::Message { event_id, content } => {
            handle_message(portal, session, &event_id, &content).await
        }
        MatrixEvent::Reaction {
            event_id,
            target,
            key,
        } => handle_reaction(portal, session, &event_id, &target, &key).await,
        MatrixEvent::Redaction { redacts } => handle_redaction(portal, session, &redacts).await,
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

async fn handle_message(
    portal: &Portal,
    session: &SessionHandle,
    event_id: &EventId,
    content: &MessageContent,
) -> Result<(), BridgeError> {
    let ctx = portal.ctx();
    let conv = Converter {
        db: &ctx.db,
        client: session.client.as_ref(),
        homeserver: ctx.homeserver.as_ref(),
        emoji: &ctx.emoji,
        puppets: &ctx.puppets,
        config: &ctx.config.bridge,
        team_id: &portal.key.team,
        channel_id: &portal.key.channel,
    };
    let request = match matrix_to_slack(&conv, content).await {
        Ok(request) => request,
        Err(e) => {
            notify_failure(portal, &format!("Message not bridged: {}", e)).await;
            return Err(e.into());
        }
    };

    match request {
        SlackSendRequest::Message {
            text,
            blocks,
            thread_ts,
        } => {
            let resp = session
                .client
                .post_message(&PostMessageRequest {
                    channel: portal.key.channel.clone(),
                    text,
                    blocks,
                    thread_ts: thread_ts.clone(),
                })
                .await
                .map_err(BridgeError::from)?;
            insert_sent_row(portal, session, &resp.ts, "", 0, thread_ts.as_deref(), event_id)?;
        }
        SlackSendRequest::Edit { ts, text, blocks } => {
            session
                .client
                .update_message(&UpdateMessageRequest {
                    channel: portal.key.channel.clone(),
                    ts,
                    text,
                    blocks,
                })
                .await
                .map_err(BridgeError::from)?;
            // The original row stays; the edit has no row of its own.
        }
        SlackSendRequest::FileUpload {
            filename,
            data,
            mime: _,
            voice: _,
            caption,
            thread_ts,
        } => {
            let (ts, file_id) =
                upload_file(portal, session, &filename, data, caption.as_deref(), thread_ts.as_deref())
                    .await?;
            let part_id = format!("file-0-{}", file_id);
            insert_sent_row(
                portal,
                session,
                &ts,
                &part_id,
                0,
                thread_ts.as_deref(),
                event_id,
            )?;
        }
    }
    Ok(())
}

/// Three-step streaming upload with single-shot fallback.
async fn upload_file(
    portal: &Portal,
    session: &SessionHandle,
    filename: &str,
    data: Vec<u8>,
    caption: Option<&str>,
    thread_ts: Option<&str>,
) -> Result<(String, String), BridgeError> {
    let title = caption.unwrap_or(filename);
    let length = data.len() as u64;
    match session.client.get_upload_url(filename, length).await {
        Ok(upload) => {
            session
                .client
                .upload_to_url(&upload.upload_url, data)
                .await
                .map_err(|e| BridgeError::Media(e.to_string()))?;
            let ts = session
                .client
                .complete_upload(&upload.file_id, title, &portal.key.channel, thread_ts)
                .await
                .map_err(|e| {
                    BridgeError::Convert(ConvertError::MediaUploadFailed(e.to_string()))
                })?;
            Ok((ts, upload.file_id))
        }
        Err(e) => {
            debug!(portal = %portal.key, error = %e, "streaming upload unavailable, using single-shot");
            let (file, shares) = session
                .client
                .upload_file_legacy(&portal.key.channel, filename, data, thread_ts)
                .await
                .map_err(|e| BridgeError::Media(e.to_string()))?;
            let ts = share_ts(&shares, &portal.key.channel).ok_or(BridgeError::Convert(
                ConvertError::MediaUploadFailed("no share info in upload response".into()),
            ))?;
            Ok((ts, file.id))
        }
    }
}

fn insert_sent_row(
    portal: &Portal,
    session: &SessionHandle,
    ts: &str,
    part_id: &str,
    part_index: i64,
    thread_ts: Option<&str>,
    event_id: &EventId,
) -> Result<(), BridgeError> {
    db::message::insert_message(
        &portal.ctx().db,
        &MessageRow {
            team_id: portal.key.team.clone(),
            channel_id: portal.key.channel.clone(),
            message_ts: ts.to_owned(),
            part_id: part_id.to_owned(),
            part_index,
            thread_root_ts: thread_ts.unwrap_or("").to_owned(),
            author_id: session.user_id.clone(),
            mxid: event_id.clone(),
        },
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

async fn handle_reaction(
    portal: &Portal,
    session: &SessionHandle,
    event_id: &EventId,
    target: &EventId,
    key: &str,
) -> Result<(), BridgeError> {
    let ctx = portal.ctx();
    let shortcode = if key.starts_with("mxc://") {
        // Custom emoji round-trip through the emoji store by media URI.
        ctx.emoji
            .shortcode_for_mxc(&portal.key.team, key)
            .ok_or_else(|| {
                BridgeError::DuplicateOrUnknown(format!("unknown custom emoji {}", key))
            })?
    } else {
        let trimmed = key.trim_end_matches('\u{fe0f}');
        shortcode_for_unicode(trimmed)
            .or_else(|| shortcode_for_unicode(key))
            .ok_or_else(|| {
                BridgeError::DuplicateOrUnknown(format!("no shortcode for reaction {:?}", key))
            })?
            .to_owned()
    };

    let row = db::message::get_by_mxid(&ctx.db, target)?.ok_or_else(|| {
        BridgeError::DuplicateOrUnknown("reaction target not bridged".into())
    })?;
    if row.team_id != portal.key.team || row.channel_id != portal.key.channel {
        return Err(BridgeError::DuplicateOrUnknown(
            "reaction target in another portal".into(),
        ));
    }
    if db::reaction::get_reaction(
        &ctx.db,
        &portal.key.team,
        &portal.key.channel,
        &row.message_ts,
        &session.user_id,
        &shortcode,
    )?
    .is_some()
    {
        return Err(BridgeError::DuplicateOrUnknown("duplicate reaction".into()));
    }

    session
        .client
        .add_reaction(&portal.key.channel, &row.message_ts, &shortcode)
        .await
        .map_err(BridgeError::from)?;
    db::reaction::insert_reaction(
        &ctx.db,
        &ReactionRow {
            team_id: portal.key.team.clone(),
            channel_id: portal.key.channel.clone(),
            message_ts: row.message_ts,
            author_id: session.user_id.clone(),
            emoji_id: shortcode,
            mxid: event_id.clone(),
        },
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Redactions
// ---------------------------------------------------------------------------

async fn handle_redaction(
    portal: &Portal,
    session: &SessionHandle,
    redacts: &EventId,
) -> Result<(), BridgeError> {
    let ctx = portal.ctx();

    if let Some(row) = db::message::get_by_mxid(&ctx.db, redacts)? {
        if row.team_id != portal.key.team || row.channel_id != portal.key.channel {
            // Cross-portal target: silent no-op.
            return Ok(());
        }
        session
            .client
            .delete_message(&portal.key.channel, &row.message_ts)
            .await
            .map_err(BridgeError::from)?;
        db::message::delete_all_parts(
            &ctx.db,
            &portal.key.team,
            &portal.key.channel,
            &row.message_ts,
        )?;
        return Ok(());
    }

    if let Some(row) = db::reaction::get_reaction_by_mxid(&ctx.db, redacts)? {
        if row.team_id != portal.key.team || row.channel_id != portal.key.channel {
            return Ok(());
        }
        session
            .client
            .remove_reaction(&portal.key.channel, &row.message_ts, &row.emoji_id)
            .await
            .map_err(BridgeError::from)?;
        db::reaction::delete_reaction(&ctx.db, &row)?;
        return Ok(());
    }

    // Unknown target: nothing to do.
    Ok(())
}

// ---------------------------------------------------------------------------
// Failure notices
// ---------------------------------------------------------------------------

async fn notify_failure(portal: &Portal, text: &str) {
    let ctx = portal.ctx();
    if !ctx.config.bridge.message_error_notices {
        return;
    }
    let Ok(Some(room)) = portal.row().map(|r| r.and_then(|row| row.mxid)) else {
        return;
    };
    let bot = ctx.homeserver.bot_mxid();
    let notice = MessageContent::notice(text);
    if let Err(e) = ctx.homeserver.send_message(&room, &bot, &notice, None).await {
        warn!(portal = %portal.key, error = %e, "failure notice not delivered");
    }
}
