//! Historical and forward backfill.
//!
//! The scheduler is a cross-portal loop: it repeatedly selects the next
//! unfinished task from the store, takes the target portal's backfill lock,
//! and runs one bounded batch. Errors put the task on a cooldown; success
//! with nothing left marks it finished. Live traffic is never blocked by
//! historical fill — only the per-portal `backfill_lock` is contended.
//!
//! Forward fill (initial and missed-message) runs under the portal's
//! `forwardBackfill` lock and flushes through the batched historical-send
//! endpoint when the homeserver supports it, with deterministic event IDs
//! so re-runs are idempotent.

use crate::connector::Connector;
use crate::db::{self, ChannelType, MessageRow};
use crate::error::BridgeError;
use crate::portal::{Portal, SessionHandle};
use chrono::{Duration, Utc};
use sb_ids::parse_slack_ts;
use sb_matrix::client::BatchEvent;
use sb_matrix::event_id::deterministic_event_id;
use sb_matrix::RoomId;
use sb_slack::client::HistoryRequest;
use sb_slack::types::MessageItem;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Poll interval when no task is eligible.
const IDLE_POLL_SECS: u64 = 60;

/// Forward fill fetches pages of this size.
const FORWARD_FILL_CHUNK: u32 = 200;

// ---------------------------------------------------------------------------
// Scheduler loop
// ---------------------------------------------------------------------------

pub async fn run_scheduler(connector: Arc<Connector>, mut shutdown: watch::Receiver<bool>) {
    let config = connector.ctx().config.backfill.clone();
    if !config.enable {
        return;
    }
    info!("backfill scheduler started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let task = match db::backfill_task::get_next_task(&connector.ctx().db, Utc::now()) {
            Ok(Some(task)) => task,
            Ok(None) => {
                if wait_or_shutdown(&mut shutdown, IDLE_POLL_SECS).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!(error = %e, "backfill task query failed");
                if wait_or_shutdown(&mut shutdown, IDLE_POLL_SECS).await {
                    break;
                }
                continue;
            }
        };

        let key = sb_ids::PortalKey::new(&task.team_id, &task.channel_id);
        let Some(session) = connector.session_handle(&task.team_id, &task.user_mxid).await else {
            // No live session for this login; push the task out instead of
            // spinning on it.
            let until = Utc::now() + Duration::seconds(config.incremental.error_cooldown_secs as i64);
            let _ = db::backfill_task::set_cooldown(&connector.ctx().db, &task, until);
            continue;
        };
        let portal = connector.portal(&key).await;

        if let Err(e) =
            db::backfill_task::mark_dispatched(&connector.ctx().db, &task, Utc::now())
        {
            warn!(portal = %key, error = %e, "task dispatch stamp failed");
        }

        let row = portal.row().ok().flatten();
        let channel_type = row.as_ref().map_or(ChannelType::Unknown, |r| r.channel_type);
        let max_for_type = match channel_type {
            ChannelType::Dm => config.incremental.max_messages_dm,
            ChannelType::GroupDm => config.incremental.max_messages_group_dm,
            _ => config.incremental.max_messages_channel,
        };
        let remaining = i64::from(max_for_type) - task.backfilled_count;
        if remaining <= 0 {
            let _ = db::backfill_task::mark_completed(
                &connector.ctx().db,
                &task,
                0,
                true,
                Utc::now(),
            );
            continue;
        }
        let batch_limit = config
            .incremental
            .messages_per_batch
            .min(remaining as u32);

        let outcome = {
            let _guard = portal.backfill_lock.lock().await;
            portal.backfill_batch(&session, batch_limit).await
        };
        match outcome {
            Ok(outcome) => {
                let finished = !outcome.has_more || i64::from(outcome.count) >= remaining;
                debug!(
                    portal = %key,
                    count = outcome.count,
                    finished,
                    "historical batch done"
                );
                let _ = db::backfill_task::mark_completed(
                    &connector.ctx().db,
                    &task,
                    i64::from(outcome.count),
                    finished,
                    Utc::now(),
                );
            }
            Err(e) => {
                warn!(portal = %key, error = %e, "historical batch failed, cooling down");
                let until =
                    Utc::now() + Duration::seconds(config.incremental.error_cooldown_secs as i64);
                let _ = db::backfill_task::set_cooldown(&connector.ctx().db, &task, until);
            }
        }

        if wait_or_shutdown(&mut shutdown, config.incremental.post_batch_delay_secs).await {
            break;
        }
    }
    info!("backfill scheduler stopped");
}

/// Returns true when shutdown was signalled during the wait.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, secs: u64) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => false,
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}

// ---------------------------------------------------------------------------
// Portal backfill entry points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct BatchOutcome {
    pub count: u32,
    pub has_more: bool,
}

impl Portal {
    /// One historical batch, newest-first below `oldest_message_ts`.
    ///
    /// Caller holds `backfill_lock`.
    pub async fn backfill_batch(
        &self,
        session: &SessionHandle,
        batch_limit: u32,
    ) -> Result<BatchOutcome, BridgeError> {
        let Some(mut row) = self.row()? else {
            return Ok(BatchOutcome {
                count: 0,
                has_more: false,
            });
        };
        let Some(room) = row.mxid.clone() else {
            return Ok(BatchOutcome {
                count: 0,
                has_more: false,
            });
        };
        if !row.more_to_backfill {
            return Ok(BatchOutcome {
                count: 0,
                has_more: false,
            });
        }

        let page = session
            .client
            .conversation_history(&HistoryRequest {
                channel: self.key.channel.clone(),
                latest: row.oldest_message_ts.clone(),
                oldest: None,
                limit: batch_limit,
                inclusive: false,
            })
            .await
            .map_err(BridgeError::from)?;

        let mut items = page.messages;
        sort_ascending(&mut items);
        let earliest = items.first().map(|m| m.ts.clone());
        let count = self.flush_history(session, &room, &items).await?;

        if let Some(earliest) = earliest {
            row.oldest_message_ts = Some(earliest);
        }
        row.more_to_backfill = page.has_more;
        db::portal::upsert_portal(&self.ctx().db, &row)?;

        Ok(BatchOutcome {
            count,
            has_more: page.has_more,
        })
    }

    /// Forward fill from the newest bridged message upward.
    ///
    /// Caller holds `forwardBackfill` lock. Pages of 200 are accumulated
    /// and flushed in one pass so a partial fetch never leaves a gap.
    pub async fn forward_fill_locked(
        &self,
        session: &SessionHandle,
        room: &RoomId,
        limit: u32,
    ) -> Result<u32, BridgeError> {
        if limit == 0 {
            return Ok(0);
        }
        let anchor = db::message::get_latest_message_ts(
            &self.ctx().db,
            &self.key.team,
            &self.key.channel,
        )?;

        let mut collected: Vec<MessageItem> = Vec::new();
        let mut latest_cursor: Option<String> = None;
        loop {
            let chunk = FORWARD_FILL_CHUNK.min(limit - collected.len() as u32);
            if chunk == 0 {
                break;
            }
            let page = session
                .client
                .conversation_history(&HistoryRequest {
                    channel: self.key.channel.clone(),
                    latest: latest_cursor.clone(),
                    oldest: anchor.clone(),
                    limit: chunk,
                    inclusive: false,
                })
                .await
                .map_err(BridgeError::from)?;
            if page.messages.is_empty() {
                break;
            }
            // Pages come newest-first; the oldest entry of this page is the
            // `latest` bound for the next one.
            latest_cursor = page.messages.last().map(|m| m.ts.clone());
            let done = !page.has_more;
            collected.extend(page.messages);
            if done || collected.len() as u32 >= limit {
                break;
            }
        }

        sort_ascending(&mut collected);
        let earliest = collected.first().map(|m| m.ts.clone());
        let count = self.flush_history(session, room, &collected).await?;

        if count > 0 {
            if let Some(mut row) = self.row()? {
                if row.oldest_message_ts.is_none() {
                    row.oldest_message_ts = earliest;
                    db::portal::upsert_portal(&self.ctx().db, &row)?;
                }
            }
            debug!(portal = %self.key, count, "forward fill flushed");
        }
        Ok(count)
    }

    /// Send a batch of history items, oldest first. Uses the batched
    /// endpoint with deterministic IDs when available; falls back to
    /// one-by-one sends with origin timestamps otherwise.
    async fn flush_history(
        &self,
        session: &SessionHandle,
        room: &RoomId,
        items: &[MessageItem],
    ) -> Result<u32, BridgeError> {
        let ctx = self.ctx();
        let mut sent: u32 = 0;

        if ctx.homeserver.supports_batch_send() {
            let mut events: Vec<BatchEvent> = Vec::new();
            let mut rows: Vec<MessageRow> = Vec::new();
            // History-marker protocol compatibility: a dummy event gates the
            // front of the batch and a marker closes it.
            events.push(self.gate_event(room, "fi.mau.dummy.pre_backfill"));
            for item in items {
                self.build_batch_events(session, room, item, &mut events, &mut rows)
                    .await?;
            }
            events.push(self.gate_event(room, "org.matrix.msc2716.marker"));
            let ids = ctx
                .homeserver
                .batch_send(room, &events)
                .await
                .map_err(BridgeError::from)?;
            if ids.len() != events.len() {
                warn!(
                    portal = %self.key,
                    sent = events.len(),
                    acked = ids.len(),
                    "batch send returned unexpected event count"
                );
            }
            for row in rows {
                match db::message::insert_message(&ctx.db, &row) {
                    Ok(()) => sent += 1,
                    Err(e) if e.is_duplicate() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            return Ok(sent);
        }

        for item in items {
            match self.send_history_item(session, room, item).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(portal = %self.key, ts = %item.ts, error = %e, "history item failed");
                }
            }
        }
        Ok(sent)
    }

    fn gate_event(&self, room: &RoomId, event_type: &str) -> BatchEvent {
        BatchEvent {
            event_id: deterministic_event_id(
                room,
                &self.key.team,
                &self.key.channel,
                "0",
                event_type,
            ),
            sender: self.ctx().homeserver.bot_mxid(),
            event_type: event_type.to_owned(),
            content: serde_json::json!({}),
            origin_server_ts: Utc::now().timestamp_millis(),
        }
    }

    async fn build_batch_events(
        &self,
        session: &SessionHandle,
        room: &RoomId,
        item: &MessageItem,
        events: &mut Vec<BatchEvent>,
        rows: &mut Vec<MessageRow>,
    ) -> Result<(), BridgeError> {
        let ctx = self.ctx();
        if skip_history_item(item) {
            return Ok(());
        }
        let Some(author) = crate::portal::inbound::item_author(item) else {
            return Ok(());
        };
        let existing =
            db::message::get_parts(&ctx.db, &self.key.team, &self.key.channel, &item.ts)?;
        if !existing.is_empty() {
            return Ok(());
        }
        let converted = crate::portal::inbound::convert_message(
            self,
            session,
            &crate::convert::SlackMessage::from_item(item),
        )
        .await;
        let converted = match converted {
            Ok(parts) => parts,
            Err(e) => {
                warn!(portal = %self.key, ts = %item.ts, error = %e, "history item dropped");
                return Ok(());
            }
        };
        let sender = ctx.puppets.ghost_mxid(&self.key.team, &author);
        let origin_ts = parse_slack_ts(&item.ts).timestamp_millis();
        let thread_root = item
            .thread_ts
            .as_ref()
            .filter(|root| **root != item.ts)
            .cloned()
            .unwrap_or_default();

        for part in converted {
            let part_id = part.part_id.to_string();
            let event_id = deterministic_event_id(
                room,
                &self.key.team,
                &self.key.channel,
                &item.ts,
                &part_id,
            );
            events.push(BatchEvent {
                event_id: event_id.clone(),
                sender: sender.clone(),
                event_type: "m.room.message".to_owned(),
                content: serde_json::to_value(&part.content)
                    .unwrap_or_else(|_| serde_json::json!({})),
                origin_server_ts: origin_ts,
            });
            rows.push(MessageRow {
                team_id: self.key.team.clone(),
                channel_id: self.key.channel.clone(),
                message_ts: item.ts.clone(),
                part_id,
                part_index: part.part_index,
                thread_root_ts: thread_root.clone(),
                author_id: author.clone(),
                mxid: event_id,
            });
        }
        Ok(())
    }

    /// Live-style send of one history item. Returns false when skipped.
    async fn send_history_item(
        &self,
        session: &SessionHandle,
        room: &RoomId,
        item: &MessageItem,
    ) -> Result<bool, BridgeError> {
        let ctx = self.ctx();
        if skip_history_item(item) {
            return Ok(false);
        }
        let Some(author) = crate::portal::inbound::item_author(item) else {
            return Ok(false);
        };
        let existing =
            db::message::get_parts(&ctx.db, &self.key.team, &self.key.channel, &item.ts)?;
        if !existing.is_empty() {
            return Ok(false);
        }
        let converted = match crate::portal::inbound::convert_message(
            self,
            session,
            &crate::convert::SlackMessage::from_item(item),
        )
        .await
        {
            Ok(parts) => parts,
            Err(_) => return Ok(false),
        };
        if converted.is_empty() {
            return Ok(false);
        }
        let sender = ctx.puppets.ghost_mxid(&self.key.team, &author);
        let origin_ts = parse_slack_ts(&item.ts).timestamp_millis();
        let thread_root = item
            .thread_ts
            .as_ref()
            .filter(|root| **root != item.ts)
            .cloned()
            .unwrap_or_default();
        for part in converted {
            let event_id = ctx
                .homeserver
                .send_message(room, &sender, &part.content, Some(origin_ts))
                .await
                .map_err(BridgeError::from)?;
            db::message::insert_message(
                &ctx.db,
                &MessageRow {
                    team_id: self.key.team.clone(),
                    channel_id: self.key.channel.clone(),
                    message_ts: item.ts.clone(),
                    part_id: part.part_id.to_string(),
                    part_index: part.part_index,
                    thread_root_ts: thread_root.clone(),
                    author_id: author.clone(),
                    mxid: event_id,
                },
            )?;
        }
        Ok(true)
    }
}

/// Join/leave notices and other service subtypes stay out of history.
fn skip_history_item(item: &MessageItem) -> bool {
    matches!(
        item.subtype.as_deref(),
        Some("channel_join")
            | Some("channel_leave")
            | Some("group_join")
            | Some("group_leave")
            | Some("message_deleted")
    )
}

fn sort_ascending(items: &mut [MessageItem]) {
    items.sort_by_key(|m| parse_slack_ts(&m.ts));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(ts: &str) -> MessageItem {
        MessageItem {
            ts: ts.into(),
            user: Some("U1".into()),
            ..MessageItem::default()
        }
    }

    #[test]
    fn history_sorts_ascending_by_parsed_ts() {
        let mut items = vec![item("1700.000300"), item("1700.000100"), item("1700.000200")];
        sort_ascending(&mut items);
        let order: Vec<&str> = items.iter().map(|m| m.ts.as_str()).collect();
        assert_eq!(order, vec!["1700.000100", "1700.000200", "1700.000300"]);
    }

    #[test]
    fn service_subtypes_are_skipped() {
        let mut joined = item("1.0");
        joined.subtype = Some("channel_join".into());
        assert!(skip_history_item(&joined));
        assert!(!skip_history_item(&item("1.0")));
    }
}
