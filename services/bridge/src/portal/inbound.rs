//! Slack → homeserver event handling for one portal.

use super::{Portal, SessionHandle};
use crate::convert::to_matrix::slack_to_matrix;
use crate::convert::{Converter, SlackMessage};
use crate::db::{self, MessageRow, ReactionRow};
use crate::emoji::ResolvedEmoji;
use crate::error::BridgeError;
use sb_ids::parse_slack_ts;
use sb_matrix::content::{ReactionContent, RelatesTo, SlackReactionInfo};
use sb_matrix::{EventId, MessageContent, RoomId};
use sb_slack::events::{
    ChannelMarkedEvent, MessageEvent, ReactionEvent, SlackEvent,
};
use sb_slack::types::{Conversation, MessageItem};
use tracing::{debug, warn};

pub async fn handle_slack_event(
    portal: &Portal,
    session: &SessionHandle,
    event: SlackEvent,
) -> Result<(), BridgeError> {
    match event {
        SlackEvent::Message(msg) => handle_message(portal, session, &msg).await,
        SlackEvent::ReactionAdded(r) => handle_reaction_added(portal, session, &r).await,
        SlackEvent::ReactionRemoved(r) => handle_reaction_removed(portal, session, &r).await,
        SlackEvent::UserTyping(t) => portal.handle_typing(&t.user).await,
        SlackEvent::ChannelMarked(m) => handle_channel_marked(portal, session, &m).await,
        SlackEvent::ChannelJoined(c) | SlackEvent::GroupJoined(c) => {
            portal.ensure_room(session, Some(&c.channel)).await?;
            portal.update_info(session, &c.channel).await
        }
        SlackEvent::ChannelLeft(_) | SlackEvent::GroupLeft(_) => Ok(()),
        SlackEvent::MemberJoinedChannel(m) => {
            if let Some(room) = portal.row()?.and_then(|r| r.mxid) {
                let ghost = portal.ctx().puppets.ghost_mxid(&portal.key.team, &m.user);
                portal.ensure_ghost_joined(&room, &ghost).await;
            }
            Ok(())
        }
        SlackEvent::MemberLeftChannel(m) => {
            if let Some(room) = portal.row()?.and_then(|r| r.mxid) {
                let ghost = portal.ctx().puppets.ghost_mxid(&portal.key.team, &m.user);
                let _ = portal.ctx().homeserver.leave_as(&room, &ghost).await;
            }
            Ok(())
        }
        SlackEvent::ChannelRename(r) => {
            let info = Conversation {
                id: r.channel.id,
                name: r.channel.name,
                is_channel: true,
                ..Conversation::default()
            };
            portal.update_info(session, &info).await
        }
        // Connection-level and team-wide events (hello, goodbye, emoji
        // changes) are consumed by the session reader.
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

async fn handle_message(
    portal: &Portal,
    session: &SessionHandle,
    msg: &MessageEvent,
) -> Result<(), BridgeError> {
    if msg.is_ephemeral {
        return Ok(());
    }
    let subtype = msg.subtype();
    match subtype {
        "" | "me_message" | "bot_message" | "thread_broadcast" | "huddle_thread" => {
            handle_new_message(portal, session, msg).await
        }
        "message_changed" => handle_edit(portal, session, msg).await,
        "message_deleted" => handle_delete(portal, msg).await,
        s if s.starts_with("channel_") || s.starts_with("group_") => {
            // Metadata subtypes: refetch and resync channel info.
            let info = session
                .client
                .conversation_info(&portal.key.channel)
                .await
                .map_err(BridgeError::from)?;
            portal.update_info(session, &info).await
        }
        "message_replied" => Ok(()),
        other => {
            debug!(portal = %portal.key, subtype = other, "unhandled message subtype");
            Ok(())
        }
    }
}

async fn handle_new_message(
    portal: &Portal,
    session: &SessionHandle,
    msg: &MessageEvent,
) -> Result<(), BridgeError> {
    let ctx = portal.ctx();
    // At-most-once: a replayed delivery of a known ts produces nothing.
    let existing = db::message::get_parts(&ctx.db, &portal.key.team, &portal.key.channel, &msg.ts)?;
    if !existing.is_empty() {
        return Err(BridgeError::DuplicateOrUnknown("duplicate message".into()));
    }
    let Some(author) = msg.author().map(str::to_owned) else {
        return Err(BridgeError::DuplicateOrUnknown("no resolvable author".into()));
    };

    let room = portal.ensure_room(session, None).await?;
    // Serialize with forward fill so backfilled history cannot interleave.
    let _forward_guard = portal.forward_backfill_lock.lock().await;

    let _ = ctx
        .puppets
        .get_or_fetch(session.client.as_ref(), &portal.key.team, &author)
        .await;
    let sender = portal.sender_for(session, &author).await;
    let ghost_join_target = sender.clone();
    portal.ensure_ghost_joined(&room, &ghost_join_target).await;

    let converted = match convert_message(portal, session, &SlackMessage::from_event(msg)).await {
        Ok(parts) => parts,
        Err(e) => {
            send_error_notice(portal, &room, &e).await;
            return Err(e.into());
        }
    };
    if converted.is_empty() {
        return Ok(());
    }

    let thread = thread_relation(portal, msg.thread_ts.as_deref(), &msg.ts)?;
    let origin_ts = parse_slack_ts(&msg.ts).timestamp_millis();

    let mut last_event: Option<EventId> = None;
    for part in converted {
        let mut content = part.content;
        if let Some((root, latest)) = &thread {
            content.relates_to = Some(RelatesTo::thread(root, latest));
        }
        let event_id = ctx
            .homeserver
            .send_message(&room, &sender, &content, Some(origin_ts))
            .await
            .map_err(BridgeError::from)?;
        db::message::insert_message(
            &ctx.db,
            &MessageRow {
                team_id: portal.key.team.clone(),
                channel_id: portal.key.channel.clone(),
                message_ts: msg.ts.clone(),
                part_id: part.part_id.to_string(),
                part_index: part.part_index,
                thread_root_ts: thread_root_of(msg),
                author_id: author.clone(),
                mxid: event_id.clone(),
            },
        )?;
        last_event = Some(event_id);
    }

    if let Some(event_id) = last_event {
        // Delivery receipt from the bridge bot; best-effort.
        let bot = ctx.homeserver.bot_mxid();
        let _ = ctx.homeserver.mark_read(&room, &bot, &event_id).await;
    }
    Ok(())
}

fn thread_root_of(msg: &MessageEvent) -> String {
    match &msg.thread_ts {
        Some(root) if *root != msg.ts => root.clone(),
        _ => String::new(),
    }
}

/// (root event, latest event) for a thread reply, when the root is known.
fn thread_relation(
    portal: &Portal,
    thread_ts: Option<&str>,
    ts: &str,
) -> Result<Option<(EventId, EventId)>, BridgeError> {
    let Some(root_ts) = thread_ts else {
        return Ok(None);
    };
    if root_ts == ts {
        return Ok(None);
    }
    let ctx = portal.ctx();
    let root =
        db::message::get_first_part(&ctx.db, &portal.key.team, &portal.key.channel, root_ts)?;
    let Some(root) = root else {
        debug!(portal = %portal.key, root_ts, "thread root unknown, sending unthreaded");
        return Ok(None);
    };
    let latest =
        db::message::get_last_in_thread(&ctx.db, &portal.key.team, &portal.key.channel, root_ts)?
            .map_or_else(|| root.mxid.clone(), |row| row.mxid);
    Ok(Some((root.mxid, latest)))
}

pub(crate) async fn convert_message(
    portal: &Portal,
    session: &SessionHandle,
    msg: &SlackMessage<'_>,
) -> Result<Vec<crate::convert::ConvertedPart>, crate::convert::ConvertError> {
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
    slack_to_matrix(&conv, msg).await
}

async fn send_error_notice(portal: &Portal, room: &RoomId, error: &crate::convert::ConvertError) {
    let ctx = portal.ctx();
    if !ctx.config.bridge.message_error_notices {
        return;
    }
    let notice = MessageContent::notice(&format!("Failed to bridge message: {}", error));
    let bot = ctx.homeserver.bot_mxid();
    if let Err(e) = ctx.homeserver.send_message(room, &bot, &notice, None).await {
        warn!(portal = %portal.key, error = %e, "error notice failed");
    }
}

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

async fn handle_edit(
    portal: &Portal,
    session: &SessionHandle,
    msg: &MessageEvent,
) -> Result<(), BridgeError> {
    let ctx = portal.ctx();
    let Some(new) = msg.message.as_deref() else {
        return Err(BridgeError::DuplicateOrUnknown("edit without message".into()));
    };
    let existing = db::message::get_parts(&ctx.db, &portal.key.team, &portal.key.channel, &new.ts)?;
    if existing.is_empty() {
        // Edits whose target is unknown are dropped.
        return Err(BridgeError::DuplicateOrUnknown("edit target unknown".into()));
    }
    let Some(room) = portal.row()?.and_then(|r| r.mxid) else {
        return Ok(());
    };
    let author = new
        .author()
        .map(str::to_owned)
        .unwrap_or_else(|| existing[0].author_id.clone());
    let sender = portal.sender_for(session, &author).await;

    let converted = match convert_message(portal, session, &SlackMessage::from_item(new)).await {
        Ok(parts) => parts,
        Err(e) => {
            send_error_notice(portal, &room, &e).await;
            return Err(e.into());
        }
    };

    // Surviving parts become edits; parts absent from the edit are orphans
    // that get redacted. File bytes are never re-uploaded: a file part whose
    // part_id survives keeps its original event untouched.
    let mut surviving: std::collections::HashSet<String> = std::collections::HashSet::new();
    for part in &converted {
        let part_id = part.part_id.to_string();
        let Some(target) = existing.iter().find(|row| row.part_id == part_id) else {
            continue;
        };
        surviving.insert(part_id.clone());
        if !part.part_id.is_text() {
            continue;
        }
        let edit = part.content.clone().into_edit_of(&target.mxid);
        ctx.homeserver
            .send_message(&room, &sender, &edit, None)
            .await
            .map_err(BridgeError::from)?;
    }
    for row in &existing {
        if surviving.contains(&row.part_id) {
            continue;
        }
        ctx.homeserver
            .redact(&room, &sender, &row.mxid, "Removed by edit")
            .await
            .map_err(BridgeError::from)?;
        db::message::delete_part(
            &ctx.db,
            &row.team_id,
            &row.channel_id,
            &row.message_ts,
            &row.part_id,
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Deletions
// ---------------------------------------------------------------------------

async fn handle_delete(portal: &Portal, msg: &MessageEvent) -> Result<(), BridgeError> {
    let ctx = portal.ctx();
    let Some(deleted_ts) = &msg.deleted_ts else {
        return Err(BridgeError::DuplicateOrUnknown("delete without ts".into()));
    };
    let parts =
        db::message::get_parts(&ctx.db, &portal.key.team, &portal.key.channel, deleted_ts)?;
    if parts.is_empty() {
        return Err(BridgeError::DuplicateOrUnknown("delete target unknown".into()));
    }
    let Some(room) = portal.row()?.and_then(|r| r.mxid) else {
        return Ok(());
    };
    let bot = ctx.homeserver.bot_mxid();
    for row in &parts {
        ctx.homeserver
            .redact(&room, &bot, &row.mxid, "Deleted on Slack")
            .await
            .map_err(BridgeError::from)?;
    }
    db::message::delete_all_parts(&ctx.db, &portal.key.team, &portal.key.channel, deleted_ts)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

async fn handle_reaction_added(
    portal: &Portal,
    session: &SessionHandle,
    event: &ReactionEvent,
) -> Result<(), BridgeError> {
    let ctx = portal.ctx();
    let base = event
        .reaction
        .split("::")
        .next()
        .unwrap_or(&event.reaction)
        .to_owned();

    if db::reaction::get_reaction(
        &ctx.db,
        &portal.key.team,
        &portal.key.channel,
        &event.item.ts,
        &event.user,
        &base,
    )?
    .is_some()
    {
        return Err(BridgeError::DuplicateOrUnknown("duplicate reaction".into()));
    }

    let anchor = db::message::get_first_part(
        &ctx.db,
        &portal.key.team,
        &portal.key.channel,
        &event.item.ts,
    )?
    .ok_or_else(|| BridgeError::DuplicateOrUnknown("reaction target not found".into()))?;
    let Some(room) = portal.row()?.and_then(|r| r.mxid) else {
        return Ok(());
    };

    let resolved = ctx
        .emoji
        .resolve(session.client.as_ref(), &portal.key.team, &base)
        .await?
        .ok_or_else(|| BridgeError::DuplicateOrUnknown(format!("unknown emoji :{}:", base)))?;
    let (key, mxc) = match &resolved {
        ResolvedEmoji::Unicode(glyph) => (glyph.clone(), None),
        ResolvedEmoji::Custom { mxc, .. } => (mxc.clone(), Some(mxc.clone())),
    };

    let content = ReactionContent {
        relates_to: RelatesTo::annotation(&anchor.mxid, &key),
        slack_reaction: Some(SlackReactionInfo {
            name: format!(":{}:", base),
            mxc,
        }),
        shortcode: Some(format!(":{}:", base)),
    };
    let sender = portal.sender_for(session, &event.user).await;
    portal.ensure_ghost_joined(&room, &sender).await;
    let event_id = ctx
        .homeserver
        .send_reaction(&room, &sender, &content)
        .await
        .map_err(BridgeError::from)?;

    db::reaction::insert_reaction(
        &ctx.db,
        &ReactionRow {
            team_id: portal.key.team.clone(),
            channel_id: portal.key.channel.clone(),
            message_ts: event.item.ts.clone(),
            author_id: event.user.clone(),
            emoji_id: base,
            mxid: event_id,
        },
    )?;
    Ok(())
}

async fn handle_reaction_removed(
    portal: &Portal,
    session: &SessionHandle,
    event: &ReactionEvent,
) -> Result<(), BridgeError> {
    let ctx = portal.ctx();
    let base = event
        .reaction
        .split("::")
        .next()
        .unwrap_or(&event.reaction);
    let Some(row) = db::reaction::get_reaction(
        &ctx.db,
        &portal.key.team,
        &portal.key.channel,
        &event.item.ts,
        &event.user,
        base,
    )?
    else {
        return Err(BridgeError::DuplicateOrUnknown("reaction row not found".into()));
    };
    let Some(room) = portal.row()?.and_then(|r| r.mxid) else {
        return Ok(());
    };
    let sender = portal.sender_for(session, &event.user).await;
    ctx.homeserver
        .redact(&room, &sender, &row.mxid, "")
        .await
        .map_err(BridgeError::from)?;
    db::reaction::delete_reaction(&ctx.db, &row)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Read receipts
// ---------------------------------------------------------------------------

/// Slack read markers only bridge when the local user has a double puppet;
/// the bridge bot cannot read on their behalf.
async fn handle_channel_marked(
    portal: &Portal,
    session: &SessionHandle,
    event: &ChannelMarkedEvent,
) -> Result<(), BridgeError> {
    let ctx = portal.ctx();
    let Some(intent) = ctx.homeserver.double_puppet_of(&session.user_mxid).await else {
        return Ok(());
    };
    let Some(room) = portal.row()?.and_then(|r| r.mxid) else {
        return Ok(());
    };
    let Some(last) = db::message::get_last_part(
        &ctx.db,
        &portal.key.team,
        &portal.key.channel,
        &event.ts,
    )?
    else {
        return Ok(());
    };
    ctx.homeserver
        .mark_read(&room, &intent, &last.mxid)
        .await
        .map_err(BridgeError::from)?;
    Ok(())
}

// Items from history backfill reuse the live conversion path.
pub(crate) fn item_author(item: &MessageItem) -> Option<String> {
    item.author().map(str::to_owned)
}
