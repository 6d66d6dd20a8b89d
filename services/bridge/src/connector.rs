//! Top-level connector: owns the live maps and routes events.
//!
//! The connector is the arena owner for sessions and portals; everything
//! else holds non-owning handles. Map locks are held only for lookup and
//! insert, never across I/O.

use crate::backfill;
use crate::db::{self, UserTeamRow};
use crate::error::BridgeError;
use crate::portal::{BridgeContext, MatrixEvent, Portal, PortalEvent, SessionHandle};
use crate::user_team::UserTeam;
use sb_ids::PortalKey;
use sb_matrix::{EventId, Mxid, RoomId};
use sb_slack::events::SlackEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

/// Bounded grace period for portal queues to drain at shutdown.
const SHUTDOWN_DRAIN_SECS: u64 = 10;

pub struct Connector {
    ctx: Arc<BridgeContext>,
    portals: RwLock<HashMap<PortalKey, Arc<Portal>>>,
    sessions: RwLock<HashMap<(String, Mxid), Arc<UserTeam>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Connector {
    pub fn new(ctx: Arc<BridgeContext>) -> Arc<Connector> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Connector {
            ctx,
            portals: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            shutdown_tx,
        })
    }

    pub fn ctx(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Startup
    // -----------------------------------------------------------------------

    /// Load every stored login, start its session, and start the backfill
    /// scheduler.
    pub async fn start(self: &Arc<Connector>) -> Result<(), BridgeError> {
        let logins = db::user_team::all_user_teams(&self.ctx.db)?;
        info!(count = logins.len(), "starting sessions");
        for login in logins {
            self.start_session(login).await;
        }
        tokio::spawn(backfill::run_scheduler(
            Arc::clone(self),
            self.shutdown_signal(),
        ));
        Ok(())
    }

    pub async fn start_session(self: &Arc<Connector>, login: UserTeamRow) {
        let key = (login.team_id.clone(), login.user_mxid.clone());
        let session = UserTeam::new(Arc::clone(&self.ctx), Arc::downgrade(self), login);
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(key, Arc::clone(&session));
        }
        session.start().await;
    }

    // -----------------------------------------------------------------------
    // Maps
    // -----------------------------------------------------------------------

    /// Get or lazily create the portal for a key.
    pub async fn portal(&self, key: &PortalKey) -> Arc<Portal> {
        {
            let portals = self.portals.read().await;
            if let Some(portal) = portals.get(key) {
                return Arc::clone(portal);
            }
        }
        let mut portals = self.portals.write().await;
        // Second check under the write lock.
        if let Some(portal) = portals.get(key) {
            return Arc::clone(portal);
        }
        let portal = Portal::spawn(key.clone(), Arc::clone(&self.ctx));
        portals.insert(key.clone(), Arc::clone(&portal));
        portal
    }

    pub async fn session_handle(&self, team_id: &str, user_mxid: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&(team_id.to_owned(), user_mxid.to_owned()))?;
        session.handle()
    }

    /// Any live session on a team, for operations where the acting user
    /// does not matter (info fetches).
    pub async fn any_session_for_team(&self, team_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter(|((team, _), _)| team == team_id)
            .find_map(|(_, session)| session.handle())
    }

    pub async fn remove_session(&self, team_id: &str, user_mxid: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&(team_id.to_owned(), user_mxid.to_owned()));
    }

    // -----------------------------------------------------------------------
    // Event routing
    // -----------------------------------------------------------------------

    /// Slack-side entry: route a stream event to the owning portal's queue.
    pub async fn queue_slack_event(&self, session: &SessionHandle, event: SlackEvent) {
        let Some(channel_id) = event.channel_id().map(str::to_owned) else {
            debug!(team_id = %session.team_id, "non-portal event ignored");
            return;
        };
        let key = PortalKey::new(&session.team_id, &channel_id);
        let portal = self.portal(&key).await;
        portal.queue_event(PortalEvent::Slack {
            session: session.clone(),
            event,
        });
    }

    /// Homeserver-side entry: resolve the portal by room and the session by
    /// sender, then enqueue.
    pub async fn queue_matrix_event(
        &self,
        room: &RoomId,
        sender: &Mxid,
        event: MatrixEvent,
    ) -> Result<(), BridgeError> {
        let Some(row) = db::portal::get_portal_by_mxid(&self.ctx.db, room)? else {
            debug!(room = %room, "event for unbridged room");
            return Ok(());
        };
        let key = PortalKey::new(&row.team_id, &row.channel_id);
        let Some(session) = self.session_handle(&row.team_id, sender).await else {
            warn!(room = %room, sender = %sender, "no session for sender, event dropped");
            return Ok(());
        };
        let portal = self.portal(&key).await;
        portal.queue_event(PortalEvent::Matrix { session, event });
        Ok(())
    }

    /// Convenience wrappers for the homeserver listener.
    pub async fn on_matrix_message(
        &self,
        room: &RoomId,
        sender: &Mxid,
        event_id: &EventId,
        content: sb_matrix::MessageContent,
    ) -> Result<(), BridgeError> {
        self.queue_matrix_event(
            room,
            sender,
            MatrixEvent::Message {
                event_id: event_id.clone(),
                content,
            },
        )
        .await
    }

    pub async fn on_matrix_reaction(
        &self,
        room: &RoomId,
        sender: &Mxid,
        event_id: &EventId,
        target: &EventId,
        key: &str,
    ) -> Result<(), BridgeError> {
        self.queue_matrix_event(
            room,
            sender,
            MatrixEvent::Reaction {
                event_id: event_id.clone(),
                target: target.clone(),
                key: key.to_owned(),
            },
        )
        .await
    }

    pub async fn on_matrix_redaction(
        &self,
        room: &RoomId,
        sender: &Mxid,
        redacts: &EventId,
    ) -> Result<(), BridgeError> {
        self.queue_matrix_event(
            room,
            sender,
            MatrixEvent::Redaction {
                redacts: redacts.clone(),
            },
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Orderly shutdown: stop intake, cancel sessions, give portal queues a
    /// bounded drain window, then drop the maps. The store closes when the
    /// last handle drops.
    pub async fn shutdown(&self) {
        info!("connector shutting down");
        let _ = self.shutdown_tx.send(true);
        let sessions: Vec<Arc<UserTeam>> = {
            let map = self.sessions.read().await;
            map.values().cloned().collect()
        };
        for session in sessions {
            session.disconnect().await;
        }
        tokio::time::sleep(std::time::Duration::from_secs(SHUTDOWN_DRAIN_SECS)).await;
        self.sessions.write().await.clear();
        self.portals.write().await.clear();
        info!("connector stopped");
    }
}
