//! Per-(local user, team) session.
//!
//! Owns the streaming connection and its reconnect loop, fans inbound
//! events out to portal queues, runs the channel sync and the debounced
//! puppet-resync batcher, and tracks bridge state. Auth invalidation clears
//! the stored tokens and stops only this session.

use crate::connector::Connector;
use crate::db::{self, TeamRow, UserTeamRow};
use crate::error::BridgeError;
use crate::portal::{BridgeContext, PortalEvent, SessionHandle};
use crate::puppets::{puppet_has_name, puppet_needs_refresh};
use sb_ids::parse_slack_ts;
use sb_matrix::RoomCreateArgs;
use sb_matrix::content::{BridgeInfoContent, BridgeInfoSection, bridge_info_state_key};
use sb_slack::SlackClient;
use sb_slack::events::SlackEvent;
use sb_slack::types::Conversation;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};

/// Streaming reconnect back-off.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Puppet resync debounce; drops to the short value when any queued puppet
/// has no name yet.
const RESYNC_DEBOUNCE: Duration = Duration::from_secs(30);
const RESYNC_DEBOUNCE_NAMELESS: Duration = Duration::from_secs(1);

/// Conversation-list page size cap imposed by the API.
const CONVERSATION_PAGE_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// Bridge state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStateKind {
    Connecting,
    Connected,
    TransientDisconnect,
    BadCredentials,
}

/// One outgoing status. Every status carries the remote (team) ID, the
/// Slack user ID, and the case-preserving login ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStatus {
    pub state: BridgeStateKind,
    pub error_code: Option<String>,
    pub remote_id: String,
    pub slack_user_id: String,
    pub real_login_id: String,
}

// ---------------------------------------------------------------------------
// UserTeam
// ---------------------------------------------------------------------------

pub struct UserTeam {
    pub team_id: String,
    pub user_id: String,
    pub user_mxid: String,
    ctx: Arc<BridgeContext>,
    connector: Weak<Connector>,
    client: RwLock<Option<Arc<dyn SlackClient>>>,
    status: std::sync::Mutex<BridgeStatus>,
    resync_tx: mpsc::Sender<String>,
    resync_rx: std::sync::Mutex<Option<mpsc::Receiver<String>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl UserTeam {
    pub fn new(
        ctx: Arc<BridgeContext>,
        connector: Weak<Connector>,
        login: UserTeamRow,
    ) -> Arc<UserTeam> {
        let (resync_tx, resync_rx) = mpsc::channel(256);
        let (shutdown_tx, _) = watch::channel(false);
        let status = BridgeStatus {
            state: BridgeStateKind::Connecting,
            error_code: None,
            remote_id: login.team_id.clone(),
            slack_user_id: login.user_id.to_uppercase(),
            real_login_id: format!("{}-{}", login.team_id, login.user_id),
        };
        Arc::new(UserTeam {
            team_id: login.team_id,
            user_id: login.user_id.to_uppercase(),
            user_mxid: login.user_mxid,
            ctx,
            connector,
            client: RwLock::new(None),
            status: std::sync::Mutex::new(status),
            resync_tx,
            resync_rx: std::sync::Mutex::new(Some(resync_rx)),
            shutdown_tx,
        })
    }

    pub fn bridge_status(&self) -> BridgeStatus {
        self.status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn emit_state(&self, state: BridgeStateKind, error_code: Option<&str>) {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        status.state = state;
        status.error_code = error_code.map(str::to_owned);
        info!(
            team_id = %status.remote_id,
            slack_user_id = %status.slack_user_id,
            real_login_id = %status.real_login_id,
            state = ?state,
            error_code = error_code.unwrap_or(""),
            "bridge state"
        );
    }

    /// Handle for portals; `None` until connected.
    pub fn handle(&self) -> Option<SessionHandle> {
        let client = self.client.try_read().ok()?.clone()?;
        Some(SessionHandle {
            team_id: self.team_id.clone(),
            user_id: self.user_id.clone(),
            user_mxid: self.user_mxid.clone(),
            client,
        })
    }

    async fn login_row(&self) -> Result<Option<UserTeamRow>, BridgeError> {
        Ok(db::user_team::get_user_team(
            &self.ctx.db,
            &self.team_id,
            &sb_ids::fold_user_id(&self.user_id),
            &self.user_mxid,
        )?)
    }

    // -----------------------------------------------------------------------
    // Connect
    // -----------------------------------------------------------------------

    pub async fn start(self: &Arc<UserTeam>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.connect().await {
                match e {
                    BridgeError::AuthInvalidated => this.handle_auth_invalidated().await,
                    e => {
                        warn!(team_id = %this.team_id, error = %e, "session start failed");
                        this.emit_state(BridgeStateKind::TransientDisconnect, None);
                    }
                }
            }
        });
    }

    async fn connect(self: &Arc<UserTeam>) -> Result<(), BridgeError> {
        self.emit_state(BridgeStateKind::Connecting, None);
        let Some(login) = self.login_row().await? else {
            return Err(BridgeError::AuthInvalidated);
        };
        if login.token.is_none() {
            return Err(BridgeError::AuthInvalidated);
        }
        let client: Arc<dyn SlackClient> = (self.ctx.client_factory)(&login);
        *self.client.write().await = Some(Arc::clone(&client));

        let team_info = client.team_info().await.map_err(BridgeError::from)?;
        self.sync_team_info(&team_info).await?;

        // Reader, puppet-resync batcher, then emoji + channel sync.
        let this = Arc::clone(self);
        tokio::spawn(async move { this.event_loop().await });

        if let Some(rx) = self
            .resync_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.resync_worker(rx).await });
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(session) = this.handle() {
                if let Err(e) = this
                    .ctx
                    .emoji
                    .resync(session.client.as_ref(), &this.team_id, false)
                    .await
                {
                    warn!(team_id = %this.team_id, error = %e, "emoji sync failed");
                }
                if let Err(e) = this.sync_channels(&session).await {
                    match e {
                        BridgeError::AuthInvalidated => this.handle_auth_invalidated().await,
                        e => warn!(team_id = %this.team_id, error = %e, "channel sync failed"),
                    }
                }
            }
        });
        Ok(())
    }

    async fn sync_team_info(
        &self,
        info: &sb_slack::types::TeamInfo,
    ) -> Result<(), BridgeError> {
        let existing = db::team::get_team(&self.ctx.db, &self.team_id)?;
        let mut row = existing.unwrap_or_else(|| TeamRow {
            team_id: self.team_id.clone(),
            ..TeamRow::default()
        });
        row.name = self.ctx.config.bridge.team_name(&info.name);
        row.domain = info.domain.clone();
        row.url = info.url.clone();
        if !info.icon.image_default {
            row.avatar_url = info.icon.image_230.clone();
        }
        row.name_set = true;
        if row.space_room.is_none() {
            row.space_room = Some(self.create_team_space(&row.name).await?);
        }
        db::team::upsert_team(&self.ctx.db, &row)?;
        Ok(())
    }

    async fn create_team_space(&self, name: &str) -> Result<String, BridgeError> {
        let args = RoomCreateArgs {
            name: Some(name.to_owned()),
            invite: vec![self.user_mxid.clone()],
            is_space: true,
            federate: self.ctx.config.bridge.federate_rooms,
            bridge_info_state_key: bridge_info_state_key(&self.team_id, None),
            bridge_info: BridgeInfoContent {
                bridgebot: self.ctx.homeserver.bot_mxid(),
                creator: self.ctx.homeserver.bot_mxid(),
                protocol: BridgeInfoSection {
                    id: "slackgo".to_owned(),
                    displayname: Some("Slack".to_owned()),
                    ..BridgeInfoSection::default()
                },
                network: BridgeInfoSection {
                    id: self.team_id.clone(),
                    displayname: Some(name.to_owned()),
                    ..BridgeInfoSection::default()
                },
                channel: BridgeInfoSection::default(),
            },
            ..RoomCreateArgs::default()
        };
        let space = self
            .ctx
            .homeserver
            .create_room(&args)
            .await
            .map_err(BridgeError::from)?;
        info!(team_id = %self.team_id, space = %space, "team space created");
        Ok(space)
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    async fn event_loop(self: Arc<UserTeam>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let Some(client) = self.client.read().await.clone() else {
                break;
            };
            match client.connect_stream().await {
                Ok(mut events) => {
                    self.emit_state(BridgeStateKind::Connected, None);
                    loop {
                        tokio::select! {
                            event = events.recv() => match event {
                                Some(event) => self.route_event(event).await,
                                None => break,
                            },
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    return;
                                }
                            }
                        }
                    }
                    self.emit_state(BridgeStateKind::TransientDisconnect, None);
                }
                Err(e) if e.is_auth_invalidated() => {
                    self.handle_auth_invalidated().await;
                    return;
                }
                Err(e) => {
                    warn!(team_id = %self.team_id, error = %e, "stream connect failed");
                    self.emit_state(BridgeStateKind::TransientDisconnect, None);
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn route_event(&self, event: SlackEvent) {
        match &event {
            SlackEvent::Hello(_) => {
                debug!(team_id = %self.team_id, "stream hello");
                return;
            }
            SlackEvent::Goodbye(_) => {
                debug!(team_id = %self.team_id, "server goodbye, expecting reconnect");
                return;
            }
            SlackEvent::Error(e) => {
                warn!(team_id = %self.team_id, code = e.error.code, msg = %e.error.msg, "stream error event");
                return;
            }
            SlackEvent::Unknown => {
                debug!(team_id = %self.team_id, "unknown stream event");
                return;
            }
            SlackEvent::EmojiChanged(_) => {
                // Any change invalidates the cached set; resync rather than
                // applying the delta.
                if let Some(session) = self.handle() {
                    if let Err(e) = self
                        .ctx
                        .emoji
                        .resync(session.client.as_ref(), &self.team_id, true)
                        .await
                    {
                        warn!(team_id = %self.team_id, error = %e, "emoji resync failed");
                    }
                }
                return;
            }
            SlackEvent::Message(msg) => {
                if let Some(author) = msg.author() {
                    let _ = self.resync_tx.try_send(author.to_owned());
                }
            }
            _ => {}
        }
        let (Some(connector), Some(session)) = (self.connector.upgrade(), self.handle()) else {
            return;
        };
        connector.queue_slack_event(&session, event).await;
    }

    // -----------------------------------------------------------------------
    // Channel sync
    // -----------------------------------------------------------------------

    /// Discover the user's conversations and emit a chat-resync into each
    /// portal's queue, ordered by latest activity ascending so the busiest
    /// chats come up last (and thus freshest).
    pub async fn sync_channels(&self, session: &SessionHandle) -> Result<(), BridgeError> {
        let login = self.login_row().await?;
        let token = login.as_ref().and_then(|l| l.token.clone()).unwrap_or_default();
        let is_bot = token.starts_with("xoxb-") || token.starts_with("xapp-");

        // Latest-message and read-state maps (real users only).
        let mut latest_map: HashMap<String, String> = HashMap::new();
        if !is_bot {
            match session.client.client_counts().await {
                Ok(counts) => {
                    for entry in counts {
                        if !entry.latest.is_empty() {
                            latest_map.insert(entry.id.clone(), entry.latest.clone());
                        }
                    }
                }
                Err(e) if e.is_auth_invalidated() => return Err(BridgeError::AuthInvalidated),
                Err(e) => warn!(team_id = %self.team_id, error = %e, "client.counts failed"),
            }
        }

        let conversation_count = self.ctx.config.backfill.conversation_count;
        let use_boot_list = token.starts_with("xoxs-") || conversation_count == -1;
        let mut conversations: Vec<Conversation> = if use_boot_list {
            let boot = session.client.client_boot().await.map_err(BridgeError::from)?;
            boot.channels.into_iter().chain(boot.ims).collect()
        } else {
            let mut collected = Vec::new();
            let mut cursor = String::new();
            let total = conversation_count.max(0) as usize;
            loop {
                let remaining = total.saturating_sub(collected.len());
                if remaining == 0 {
                    break;
                }
                let limit = CONVERSATION_PAGE_LIMIT.min(remaining as u32);
                let (page, next) = session
                    .client
                    .list_conversations(&cursor, limit)
                    .await
                    .map_err(BridgeError::from)?;
                collected.extend(page);
                if next.is_empty() {
                    break;
                }
                cursor = next;
            }
            collected
        };

        // Ascending by latest message so resyncs finish on the newest chat.
        conversations.sort_by_key(|c| {
            let ts = latest_map
                .get(&c.id)
                .cloned()
                .or_else(|| c.latest.as_ref().map(|l| l.ts.clone()))
                .unwrap_or_default();
            parse_slack_ts(&ts)
        });

        let connector = self
            .connector
            .upgrade()
            .ok_or(BridgeError::DuplicateOrUnknown("connector gone".into()))?;
        let mut seen: HashSet<String> = HashSet::new();
        for conversation in conversations {
            if conversation.is_archived {
                continue;
            }
            seen.insert(conversation.id.clone());
            let latest = latest_map
                .get(&conversation.id)
                .cloned()
                .or_else(|| conversation.latest.as_ref().map(|l| l.ts.clone()));
            let create_portal = latest.is_some() || !conversation.is_im;
            let key = sb_ids::PortalKey::new(&self.team_id, &conversation.id);
            let portal = connector.portal(&key).await;
            portal.queue_event(PortalEvent::ChatResync {
                session: session.clone(),
                conversation: Some(conversation),
                latest_message: latest,
                create_portal,
            });
        }

        // Portals this login had before that the sync no longer returned;
        // resync them so orphans can catch up or clean up.
        let known = db::backfill_task::channels_for_user(
            &self.ctx.db,
            &self.team_id,
            &self.user_mxid,
        )?;
        for channel_id in known {
            if seen.contains(&channel_id) {
                continue;
            }
            let key = sb_ids::PortalKey::new(&self.team_id, &channel_id);
            let portal = connector.portal(&key).await;
            portal.queue_event(PortalEvent::ChatResync {
                session: session.clone(),
                conversation: None,
                latest_message: None,
                create_portal: false,
            });
        }
        info!(team_id = %self.team_id, "channel sync dispatched");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Puppet resync batcher
    // -----------------------------------------------------------------------

    /// Debounced batcher: new entries extend the timer; nameless entries
    /// shorten it. One batched users.info call per flush.
    async fn resync_worker(self: Arc<UserTeam>, mut rx: mpsc::Receiver<String>) {
        let mut pending: HashSet<String> = HashSet::new();
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            if pending.is_empty() {
                tokio::select! {
                    user = rx.recv() => match user {
                        Some(user) => {
                            pending.insert(user);
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
                continue;
            }
            let debounce = if pending
                .iter()
                .any(|u| !puppet_has_name(&self.ctx.db, &self.team_id, u))
            {
                RESYNC_DEBOUNCE_NAMELESS
            } else {
                RESYNC_DEBOUNCE
            };
            tokio::select! {
                user = rx.recv() => match user {
                    Some(user) => {
                        pending.insert(user);
                    }
                    None => break,
                },
                _ = tokio::time::sleep(debounce) => {
                    self.flush_resync(&mut pending).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn flush_resync(&self, pending: &mut HashSet<String>) {
        let ids: Vec<String> = pending
            .drain()
            .filter(|u| puppet_needs_refresh(&self.ctx.db, &self.team_id, u))
            .collect();
        if ids.is_empty() {
            return;
        }
        let Some(session) = self.handle() else {
            return;
        };
        if let Err(e) = self
            .ctx
            .puppets
            .fetch_and_store(session.client.as_ref(), &self.team_id, &ids)
            .await
        {
            warn!(team_id = %self.team_id, error = %e, "puppet batch refresh failed");
        }
    }

    // -----------------------------------------------------------------------
    // Disconnect / logout / auth invalidation
    // -----------------------------------------------------------------------

    /// Stop streaming and background tasks; keep the login intact.
    pub async fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        *self.client.write().await = None;
        self.emit_state(BridgeStateKind::TransientDisconnect, None);
    }

    /// Tokens rejected: clear them, persist, report BadCredentials, stop.
    async fn handle_auth_invalidated(&self) {
        warn!(team_id = %self.team_id, user_mxid = %self.user_mxid, "auth invalidated");
        if let Err(e) = db::user_team::clear_tokens(
            &self.ctx.db,
            &self.team_id,
            &sb_ids::fold_user_id(&self.user_id),
            &self.user_mxid,
        ) {
            warn!(error = %e, "token clear failed");
        }
        let _ = self.shutdown_tx.send(true);
        *self.client.write().await = None;
        self.emit_state(BridgeStateKind::BadCredentials, Some("slack-invalid-auth"));
    }

    /// Explicit logout: best-effort signout, token wipe, optional portal
    /// cleanup, and removal from the connector.
    pub async fn logout(&self) -> Result<(), BridgeError> {
        if let Some(session) = self.handle() {
            if let Err(e) = session.client.auth_signout().await {
                debug!(team_id = %self.team_id, error = %e, "auth.signout failed");
            }
        }
        let _ = self.shutdown_tx.send(true);
        *self.client.write().await = None;

        let folded = sb_ids::fold_user_id(&self.user_id);
        db::user_team::clear_tokens(&self.ctx.db, &self.team_id, &folded, &self.user_mxid)?;

        if self.ctx.config.bridge.kick_on_logout {
            self.cleanup_portals().await?;
        }
        db::backfill_task::delete_tasks_for_user(&self.ctx.db, &self.team_id, &self.user_mxid)?;
        db::user_team::delete_user_team(&self.ctx.db, &self.team_id, &folded, &self.user_mxid)?;
        if let Some(connector) = self.connector.upgrade() {
            connector.remove_session(&self.team_id, &self.user_mxid).await;
        }
        self.emit_state(BridgeStateKind::BadCredentials, Some("logged-out"));
        Ok(())
    }

    /// Portals where this login was the last local member are cleaned up
    /// and deleted; shared portals just lose this user.
    async fn cleanup_portals(&self) -> Result<(), BridgeError> {
        let Some(connector) = self.connector.upgrade() else {
            return Ok(());
        };
        let others: Vec<UserTeamRow> =
            db::user_team::user_teams_for_team(&self.ctx.db, &self.team_id)?
                .into_iter()
                .filter(|row| row.user_mxid != self.user_mxid)
                .collect();
        let channels =
            db::backfill_task::channels_for_user(&self.ctx.db, &self.team_id, &self.user_mxid)?;
        for channel_id in channels {
            let key = sb_ids::PortalKey::new(&self.team_id, &channel_id);
            let portal = connector.portal(&key).await;
            if others.is_empty() {
                portal.cleanup_and_delete(Some(&self.user_mxid)).await?;
            } else if let Some(row) = portal.row()? {
                if let Some(room) = row.mxid {
                    let _ = self
                        .ctx
                        .homeserver
                        .kick(&room, &self.user_mxid, "Logged out of the bridge")
                        .await;
                }
            }
        }
        Ok(())
    }
}
