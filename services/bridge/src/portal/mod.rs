//! Per-conversation state machine and event-queue owner.
//!
//! Each portal drains a bounded single-consumer queue fed by the connector
//! (homeserver events) and the owning session (Slack events), giving
//! per-portal ordering without locks on the hot path. Producers drop with a
//! warning when the queue is full rather than blocking the stream reader.
//!
//! # Locks
//! - `room_create_lock`: exclusive room creation
//! - `backfill_lock`: historical backfill, never blocks live events
//! - `forward_backfill_lock`: room-creation→first-forward-fill window, and
//!   live message handling, so forward fill cannot race live traffic
//! - `encrypt_lock`: serializes encryption calls per room
//! - `currently_typing`: guards the typing set

pub mod inbound;
pub mod outbound;

use crate::config::{BridgeConfig, PrivateChatMeta};
use crate::db::{self, ChannelType, Db, PortalRow};
use crate::emoji::EmojiCache;
use crate::error::BridgeError;
use crate::puppets::Puppets;
use sb_ids::PortalKey;
use sb_matrix::content::{BridgeInfoContent, BridgeInfoSection, bridge_info_state_key};
use sb_matrix::{EventId, Homeserver, MessageContent, Mxid, RoomCreateArgs, RoomId};
use sb_slack::events::SlackEvent;
use sb_slack::types::Conversation;
use sb_slack::SlackClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// How long a single typing signal lasts on the homeserver.
const TYPING_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Shared collaborator bundle
// ---------------------------------------------------------------------------

/// Builds a Slack client for a stored login. Production wires this to
/// `HttpSlackClient`; tests substitute mocks.
pub type ClientFactory =
    dyn Fn(&db::UserTeamRow) -> Arc<dyn SlackClient> + Send + Sync;

/// Everything a portal needs besides the per-session Slack client. Owned by
/// the connector; portals hold a shared handle.
pub struct BridgeContext {
    pub db: Arc<Db>,
    pub homeserver: Arc<dyn Homeserver>,
    pub emoji: Arc<EmojiCache>,
    pub puppets: Arc<Puppets>,
    pub config: BridgeConfig,
    pub client_factory: Box<ClientFactory>,
}

/// Per-session data the portal needs to act on Slack's side.
#[derive(Clone)]
pub struct SessionHandle {
    pub team_id: String,
    /// Slack user ID of the logged-in user.
    pub user_id: String,
    /// Local Matrix user the session belongs to.
    pub user_mxid: Mxid,
    pub client: Arc<dyn SlackClient>,
}

// ---------------------------------------------------------------------------
// Queue events
// ---------------------------------------------------------------------------

/// Homeserver-originated events, routed by the connector with the session
/// already resolved.
#[derive(Clone)]
pub enum MatrixEvent {
    Message {
        event_id: EventId,
        content: MessageContent,
    },
    Reaction {
        event_id: EventId,
        target: EventId,
        key: String,
    },
    Redaction {
        redacts: EventId,
    },
}

/// One entry in the portal queue.
pub enum PortalEvent {
    Slack {
        session: SessionHandle,
        event: SlackEvent,
    },
    Matrix {
        session: SessionHandle,
        event: MatrixEvent,
    },
    /// Channel-sync outcome: refresh info, optionally create the room, and
    /// catch up on missed messages.
    ChatResync {
        session: SessionHandle,
        conversation: Option<Conversation>,
        latest_message: Option<String>,
        create_portal: bool,
    },
}

// ---------------------------------------------------------------------------
// Portal
// ---------------------------------------------------------------------------

pub struct Portal {
    pub key: PortalKey,
    ctx: Arc<BridgeContext>,
    tx: mpsc::Sender<PortalEvent>,
    room_create_lock: Mutex<()>,
    pub(crate) backfill_lock: Mutex<()>,
    pub(crate) forward_backfill_lock: Mutex<()>,
    #[allow(dead_code)]
    encrypt_lock: Mutex<()>,
    currently_typing: std::sync::Mutex<HashMap<String, Instant>>,
}

impl Portal {
    /// Create the portal and spawn its queue consumer.
    pub fn spawn(key: PortalKey, ctx: Arc<BridgeContext>) -> Arc<Portal> {
        let (tx, rx) = mpsc::channel(ctx.config.bridge.portal_message_buffer);
        let portal = Arc::new(Portal {
            key,
            ctx,
            tx,
            room_create_lock: Mutex::new(()),
            backfill_lock: Mutex::new(()),
            forward_backfill_lock: Mutex::new(()),
            encrypt_lock: Mutex::new(()),
            currently_typing: std::sync::Mutex::new(HashMap::new()),
        });
        tokio::spawn(Portal::run(Arc::clone(&portal), rx));
        portal
    }

    /// Producer-side enqueue. Drops (with a warning) when the buffer is
    /// full; blocking here would stall the stream reader for every portal.
    pub fn queue_event(&self, event: PortalEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
            warn!(portal = %self.key, "portal queue full, dropping event");
        }
    }

    async fn run(self: Arc<Portal>, mut rx: mpsc::Receiver<PortalEvent>) {
        debug!(portal = %self.key, "portal loop started");
        while let Some(event) = rx.recv().await {
            let result = match event {
                PortalEvent::Slack { session, event } => {
                    inbound::handle_slack_event(&self, &session, event).await
                }
                PortalEvent::Matrix { session, event } => {
                    outbound::handle_matrix_event(&self, &session, event).await
                }
                PortalEvent::ChatResync {
                    session,
                    conversation,
                    latest_message,
                    create_portal,
                } => {
                    self.handle_chat_resync(&session, conversation, latest_message, create_portal)
                        .await
                }
            };
            if let Err(e) = result {
                match e {
                    BridgeError::DuplicateOrUnknown(ref what) => {
                        debug!(portal = %self.key, what = %what, "event ignored");
                    }
                    e => warn!(portal = %self.key, error = %e, "event handling failed"),
                }
            }
        }
        debug!(portal = %self.key, "portal loop finished");
    }

    pub(crate) fn ctx(&self) -> &BridgeContext {
        &self.ctx
    }

    pub fn row(&self) -> Result<Option<PortalRow>, BridgeError> {
        Ok(db::portal::get_portal(&self.ctx.db, &self.key)?)
    }

    fn row_or_default(&self) -> Result<PortalRow, BridgeError> {
        Ok(self.row()?.unwrap_or_else(|| PortalRow {
            team_id: self.key.team.clone(),
            channel_id: self.key.channel.clone(),
            more_to_backfill: true,
            ..PortalRow::default()
        }))
    }

    // -----------------------------------------------------------------------
    // Room lifecycle
    // -----------------------------------------------------------------------

    /// Room ID, creating the room on first use.
    pub async fn ensure_room(
        &self,
        session: &SessionHandle,
        info: Option<&Conversation>,
    ) -> Result<RoomId, BridgeError> {
        if let Some(row) = self.row()? {
            if let Some(mxid) = row.mxid {
                return Ok(mxid);
            }
        }
        let _create_guard = self.room_create_lock.lock().await;
        // Second check under the lock.
        if let Some(row) = self.row()? {
            if let Some(mxid) = row.mxid {
                return Ok(mxid);
            }
        }
        // Held across creation and the initial forward fill so live
        // messages queue up behind a fully-initialized room.
        let _forward_guard = self.forward_backfill_lock.lock().await;

        let fetched;
        let info = match info {
            Some(info) => info,
            None => {
                fetched = session
                    .client
                    .conversation_info(&self.key.channel)
                    .await
                    .map_err(BridgeError::from)?;
                &fetched
            }
        };

        let mut row = self.row_or_default()?;
        row.channel_type = classify(info);
        self.apply_conversation_info(&mut row, info);
        if row.channel_type == ChannelType::Dm || row.channel_type == ChannelType::GroupDm {
            row.receiver = session.user_mxid.clone();
        }

        let participants = self.gather_participants(session, info, row.channel_type).await;
        let name = self
            .compute_display_name(session, &row, info, &participants)
            .await?;
        let apply_meta = self.should_apply_meta(&row);

        let mut invites: Vec<Mxid> = Vec::new();
        for user_id in &participants {
            invites.push(self.ctx.puppets.ghost_mxid(&self.key.team, user_id));
        }
        invites.push(session.user_mxid.clone());

        let space = self.team_space_room()?;
        let args = RoomCreateArgs {
            name: apply_meta.then(|| name.clone()),
            topic: (apply_meta && !row.topic.is_empty()).then(|| row.topic.clone()),
            avatar_url: None,
            invite: invites,
            is_direct: row.channel_type == ChannelType::Dm,
            is_space: false,
            encrypted: row.encrypted,
            federate: self.ctx.config.bridge.federate_rooms,
            space_parent: space.clone(),
            bridge_info_state_key: bridge_info_state_key(&self.key.team, Some(&self.key.channel)),
            bridge_info: self.bridge_info(&name),
        };

        info!(portal = %self.key, channel_type = ?row.channel_type, "creating room");
        let room = self
            .ctx
            .homeserver
            .create_room(&args)
            .await
            .map_err(BridgeError::from)?;

        row.mxid = Some(room.clone());
        row.name = name.clone();
        row.formatted_name = name;
        row.name_set = apply_meta;
        row.topic_set = apply_meta && !row.topic.is_empty();
        row.avatar_set = false;
        if let Some(space) = &space {
            match self.ctx.homeserver.add_to_space(space, &room).await {
                Ok(()) => row.in_space = true,
                Err(e) => warn!(portal = %self.key, error = %e, "space add failed"),
            }
        }
        db::portal::upsert_portal(&self.ctx.db, &row)?;
        db::backfill_task::ensure_task(
            &self.ctx.db,
            &self.key.team,
            &self.key.channel,
            &session.user_mxid,
            0,
        )?;

        if !self.ctx.homeserver.auto_join_invites() {
            for user_id in &participants {
                let ghost = self.ctx.puppets.ghost_mxid(&self.key.team, user_id);
                let _ = self.ctx.homeserver.join_as(&room, &ghost).await;
            }
        }

        // Initial forward fill while still holding the forward lock.
        if self.ctx.config.backfill.enable {
            let limit = self.ctx.config.backfill.immediate_messages;
            if let Err(e) = self.forward_fill_locked(session, &room, limit).await {
                warn!(portal = %self.key, error = %e, "initial forward fill failed");
            }
        }

        Ok(room)
    }

    fn bridge_info(&self, channel_name: &str) -> BridgeInfoContent {
        BridgeInfoContent {
            bridgebot: self.ctx.homeserver.bot_mxid(),
            creator: self.ctx.homeserver.bot_mxid(),
            protocol: BridgeInfoSection {
                id: "slackgo".to_owned(),
                displayname: Some("Slack".to_owned()),
                ..BridgeInfoSection::default()
            },
            network: BridgeInfoSection {
                id: self.key.team.clone(),
                ..BridgeInfoSection::default()
            },
            channel: BridgeInfoSection {
                id: self.key.channel.clone(),
                displayname: Some(channel_name.to_owned()),
                ..BridgeInfoSection::default()
            },
        }
    }

    fn team_space_room(&self) -> Result<Option<RoomId>, BridgeError> {
        Ok(db::team::get_team(&self.ctx.db, &self.key.team)?.and_then(|t| t.space_room))
    }

    async fn gather_participants(
        &self,
        session: &SessionHandle,
        info: &Conversation,
        channel_type: ChannelType,
    ) -> Vec<String> {
        match channel_type {
            ChannelType::Dm => info
                .user
                .clone()
                .map(|peer| vec![peer])
                .unwrap_or_default(),
            ChannelType::GroupDm | ChannelType::Channel => {
                let limit = self.ctx.config.bridge.participant_sync_count;
                if limit == 0 {
                    return Vec::new();
                }
                match session
                    .client
                    .conversation_members(&self.key.channel, limit)
                    .await
                {
                    Ok(members) => members,
                    Err(e) => {
                        warn!(portal = %self.key, error = %e, "member fetch failed");
                        Vec::new()
                    }
                }
            }
            ChannelType::Unknown => Vec::new(),
        }
    }

    /// Display name per channel type: channels use the template; DMs take
    /// the peer puppet's name; group DMs join the case-fold-sorted puppet
    /// names with commas.
    async fn compute_display_name(
        &self,
        session: &SessionHandle,
        row: &PortalRow,
        info: &Conversation,
        participants: &[String],
    ) -> Result<String, BridgeError> {
        match row.channel_type {
            ChannelType::Channel | ChannelType::Unknown => {
                Ok(self.ctx.config.bridge.channel_name(&info.name))
            }
            ChannelType::Dm => {
                let Some(peer) = &info.user else {
                    return Ok(String::new());
                };
                let puppet = self
                    .ctx
                    .puppets
                    .get_or_fetch(session.client.as_ref(), &self.key.team, peer)
                    .await?;
                Ok(puppet.map(|p| p.name).unwrap_or_else(|| peer.clone()))
            }
            ChannelType::GroupDm => {
                let mut names = Vec::new();
                for user_id in participants {
                    if *user_id == session.user_id {
                        continue;
                    }
                    let name = match self
                        .ctx
                        .puppets
                        .get_or_fetch(session.client.as_ref(), &self.key.team, user_id)
                        .await?
                    {
                        Some(p) => p.name,
                        None => user_id.clone(),
                    };
                    names.push(name);
                }
                names.sort_by_key(|n| n.to_lowercase());
                Ok(names.join(", "))
            }
        }
    }

    /// DM metadata policy: `always`, or encrypted-and-not-`never`.
    fn should_apply_meta(&self, row: &PortalRow) -> bool {
        if !row.channel_type.is_private_chat() {
            return true;
        }
        match self.ctx.config.bridge.private_chat_portal_meta {
            PrivateChatMeta::Always => true,
            PrivateChatMeta::Never => false,
            PrivateChatMeta::Default => row.encrypted,
        }
    }

    // -----------------------------------------------------------------------
    // Info sync
    // -----------------------------------------------------------------------

    fn apply_conversation_info(&self, row: &mut PortalRow, info: &Conversation) {
        if !info.name.is_empty() {
            row.name = info.name.clone();
        }
        if let Some(topic) = &info.topic {
            row.topic = topic.value.clone();
        }
    }

    /// Idempotent info sync: each field is pushed to the room iff the
    /// persisted value differs or its `*_set` flag is still false.
    pub async fn update_info(
        &self,
        session: &SessionHandle,
        info: &Conversation,
    ) -> Result<(), BridgeError> {
        let mut row = self.row_or_default()?;
        if row.channel_type == ChannelType::Unknown {
            row.channel_type = classify(info);
        }
        let apply_meta = self.should_apply_meta(&row);

        let new_name = match row.channel_type {
            ChannelType::Channel | ChannelType::Unknown => {
                self.ctx.config.bridge.channel_name(&info.name)
            }
            _ => row.name.clone(),
        };
        let new_topic = info
            .topic
            .as_ref()
            .map_or_else(|| row.topic.clone(), |t| t.value.clone());

        let name_changed = new_name != row.formatted_name || !row.name_set;
        let topic_changed = new_topic != row.topic || !row.topic_set;
        row.name = info.name.clone();

        if let Some(room) = row.mxid.clone() {
            if apply_meta && name_changed && !new_name.is_empty() {
                match self.ctx.homeserver.set_room_name(&room, &new_name).await {
                    Ok(()) => {
                        row.formatted_name = new_name.clone();
                        row.name_set = true;
                    }
                    Err(e) => warn!(portal = %self.key, error = %e, "name update failed"),
                }
            }
            if apply_meta && topic_changed {
                match self.ctx.homeserver.set_room_topic(&room, &new_topic).await {
                    Ok(()) => {
                        row.topic = new_topic.clone();
                        row.topic_set = true;
                    }
                    Err(e) => warn!(portal = %self.key, error = %e, "topic update failed"),
                }
            }
            if !self.ctx.config.bridge.participant_sync_only_on_create {
                let participants = self
                    .gather_participants(session, info, row.channel_type)
                    .await;
                for user_id in &participants {
                    let ghost = self.ctx.puppets.ghost_mxid(&self.key.team, user_id);
                    self.ensure_ghost_joined(&room, &ghost).await;
                }
            }
        } else {
            row.topic = new_topic;
        }
        db::portal::upsert_portal(&self.ctx.db, &row)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chat resync (from channel sync)
    // -----------------------------------------------------------------------

    async fn handle_chat_resync(
        &self,
        session: &SessionHandle,
        conversation: Option<Conversation>,
        latest_message: Option<String>,
        create_portal: bool,
    ) -> Result<(), BridgeError> {
        let has_room = self.row()?.and_then(|r| r.mxid).is_some();
        if !has_room {
            if !create_portal {
                return Ok(());
            }
            self.ensure_room(session, conversation.as_ref()).await?;
        } else if let Some(info) = &conversation {
            self.update_info(session, info).await?;
        }
        db::backfill_task::ensure_task(
            &self.ctx.db,
            &self.key.team,
            &self.key.channel,
            &session.user_mxid,
            0,
        )?;

        // Missed-message forward fill up to the advertised latest.
        if self.ctx.config.backfill.enable {
            if let (Some(latest), Some(row)) = (latest_message, self.row()?) {
                let caught_up = db::message::get_first_part(
                    &self.ctx.db,
                    &self.key.team,
                    &self.key.channel,
                    &latest,
                )?
                .is_some();
                if !caught_up {
                    if let Some(room) = row.mxid {
                        let limit = self.ctx.config.backfill.missed_messages;
                        let _guard = self.forward_backfill_lock.lock().await;
                        if let Err(e) = self.forward_fill_locked(session, &room, limit).await {
                            warn!(portal = %self.key, error = %e, "missed forward fill failed");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Typing
    // -----------------------------------------------------------------------

    /// Record a typing signal and push it to the room with a 5 s timeout.
    pub async fn handle_typing(&self, user_id: &str) -> Result<(), BridgeError> {
        let Some(room) = self.row()?.and_then(|r| r.mxid) else {
            return Ok(());
        };
        {
            let mut typing = self
                .currently_typing
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let now = Instant::now();
            typing.retain(|_, started| now.duration_since(*started) < TYPING_TIMEOUT);
            typing.insert(user_id.to_owned(), now);
        }
        let ghost = self.ctx.puppets.ghost_mxid(&self.key.team, user_id);
        self.ensure_ghost_joined(&room, &ghost).await;
        self.ctx
            .homeserver
            .set_typing(&room, &ghost, TYPING_TIMEOUT.as_millis() as u64)
            .await
            .map_err(BridgeError::from)?;
        Ok(())
    }

    pub(crate) async fn ensure_ghost_joined(&self, room: &RoomId, ghost: &Mxid) {
        if self.ctx.homeserver.auto_join_invites() {
            let _ = self.ctx.homeserver.invite(room, ghost).await;
        } else {
            let _ = self.ctx.homeserver.invite(room, ghost).await;
            let _ = self.ctx.homeserver.join_as(room, ghost).await;
        }
    }

    /// Sender identity for a Slack-authored event: the local user's double
    /// puppet when they authored it themselves, their ghost otherwise.
    pub(crate) async fn sender_for(&self, session: &SessionHandle, author: &str) -> Mxid {
        if author == session.user_id {
            if let Some(intent) = self
                .ctx
                .homeserver
                .double_puppet_of(&session.user_mxid)
                .await
            {
                return intent;
            }
        }
        self.ctx.puppets.ghost_mxid(&self.key.team, author)
    }

    // -----------------------------------------------------------------------
    // Cleanup
    // -----------------------------------------------------------------------

    /// Last-local-user teardown: puppets leave first, then the row (and the
    /// room mapping with it) is deleted.
    pub async fn cleanup_and_delete(&self, kicked_user: Option<&Mxid>) -> Result<(), BridgeError> {
        if let Some(row) = self.row()? {
            if let Some(room) = &row.mxid {
                if let Some(user) = kicked_user {
                    let _ = self
                        .ctx
                        .homeserver
                        .kick(room, user, "Logged out of the bridge")
                        .await;
                }
                let _ = self
                    .ctx
                    .homeserver
                    .leave_as(room, &self.ctx.homeserver.bot_mxid())
                    .await;
            }
        }
        db::portal::delete_portal(&self.ctx.db, &self.key)?;
        info!(portal = %self.key, "portal deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// `IsIM → DM`, `IsMpIM → GroupDM`, else a non-empty name makes a channel.
pub fn classify(info: &Conversation) -> ChannelType {
    if info.is_im {
        ChannelType::Dm
    } else if info.is_mpim {
        ChannelType::GroupDm
    } else if !info.name.is_empty() {
        ChannelType::Channel
    } else {
        ChannelType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_rules() {
        let dm = Conversation {
            is_im: true,
            ..Conversation::default()
        };
        assert_eq!(classify(&dm), ChannelType::Dm);
        let mpim = Conversation {
            is_mpim: true,
            ..Conversation::default()
        };
        assert_eq!(classify(&mpim), ChannelType::GroupDm);
        let channel = Conversation {
            name: "general".into(),
            ..Conversation::default()
        };
        assert_eq!(classify(&channel), ChannelType::Channel);
        assert_eq!(classify(&Conversation::default()), ChannelType::Unknown);
    }

    #[test]
    fn bridge_info_state_key_includes_channel() {
        assert_eq!(
            bridge_info_state_key("T1", Some("C2")),
            "fi.mau.slack://slackgo/T1/C2"
        );
    }
}
