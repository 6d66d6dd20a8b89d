//! The homeserver collaborator contract.
//!
//! The bridge core holds an `Arc<dyn Homeserver>`; the concrete client
//! library, encryption, and double-puppet token plumbing live behind it.
//! "Sender" arguments are full MXIDs — ghost intents are addressed by the
//! ghost's user ID rather than an intent object.

use crate::content::{BridgeInfoContent, MessageContent, ReactionContent};
use crate::{ContentUri, EventId, Mxid, RoomId};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum MatrixError {
    Http(String),
    /// The homeserver does not advertise the requested optional capability.
    NotSupported(&'static str),
    Serialization(String),
}

impl fmt::Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixError::Http(s) => write!(f, "homeserver error: {}", s),
            MatrixError::NotSupported(what) => write!(f, "homeserver lacks {}", what),
            MatrixError::Serialization(s) => write!(f, "serialization error: {}", s),
        }
    }
}

impl std::error::Error for MatrixError {}

// ---------------------------------------------------------------------------
// Room creation
// ---------------------------------------------------------------------------

/// Everything applied atomically at room creation.
#[derive(Debug, Clone, Default)]
pub struct RoomCreateArgs {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub avatar_url: Option<ContentUri>,
    pub invite: Vec<Mxid>,
    pub is_direct: bool,
    /// `m.space` room type in the creation content.
    pub is_space: bool,
    pub encrypted: bool,
    /// `m.federate` in the creation content.
    pub federate: bool,
    pub space_parent: Option<RoomId>,
    pub bridge_info_state_key: String,
    pub bridge_info: BridgeInfoContent,
}

/// One pre-built event for a batched historical send.
#[derive(Debug, Clone)]
pub struct BatchEvent {
    /// Deterministic ID the server must honor (see `event_id`).
    pub event_id: EventId,
    pub sender: Mxid,
    pub event_type: String,
    pub content: Value,
    pub origin_server_ts: i64,
}

// ---------------------------------------------------------------------------
// The contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Homeserver: Send + Sync {
    // -- capabilities -------------------------------------------------------

    /// Whether the batched historical-send endpoint is available.
    fn supports_batch_send(&self) -> bool;
    /// Whether invites created with the room auto-join ghosts.
    fn auto_join_invites(&self) -> bool;
    /// The server's domain, for building ghost MXIDs.
    fn domain(&self) -> &str;
    /// The bridge bot's own MXID.
    fn bot_mxid(&self) -> Mxid;

    // -- rooms --------------------------------------------------------------

    async fn create_room(&self, args: &RoomCreateArgs) -> Result<RoomId, MatrixError>;
    async fn set_room_name(&self, room: &RoomId, name: &str) -> Result<(), MatrixError>;
    async fn set_room_topic(&self, room: &RoomId, topic: &str) -> Result<(), MatrixError>;
    async fn set_room_avatar(&self, room: &RoomId, avatar: &ContentUri)
        -> Result<(), MatrixError>;
    async fn send_state(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<EventId, MatrixError>;
    async fn add_to_space(&self, space: &RoomId, child: &RoomId) -> Result<(), MatrixError>;

    // -- membership ---------------------------------------------------------

    async fn invite(&self, room: &RoomId, user: &Mxid) -> Result<(), MatrixError>;
    async fn join_as(&self, room: &RoomId, user: &Mxid) -> Result<(), MatrixError>;
    async fn kick(&self, room: &RoomId, user: &Mxid, reason: &str) -> Result<(), MatrixError>;
    async fn leave_as(&self, room: &RoomId, user: &Mxid) -> Result<(), MatrixError>;

    // -- ghosts -------------------------------------------------------------

    async fn set_ghost_display_name(&self, ghost: &Mxid, name: &str) -> Result<(), MatrixError>;
    async fn set_ghost_avatar(&self, ghost: &Mxid, avatar: &ContentUri)
        -> Result<(), MatrixError>;

    // -- timeline -----------------------------------------------------------

    /// Send a message as `sender`. `ts` overrides origin_server_ts where the
    /// homeserver allows it (backfill); `None` means now.
    async fn send_message(
        &self,
        room: &RoomId,
        sender: &Mxid,
        content: &MessageContent,
        ts: Option<i64>,
    ) -> Result<EventId, MatrixError>;
    async fn send_reaction(
        &self,
        room: &RoomId,
        sender: &Mxid,
        content: &ReactionContent,
    ) -> Result<EventId, MatrixError>;
    async fn redact(
        &self,
        room: &RoomId,
        sender: &Mxid,
        event_id: &EventId,
        reason: &str,
    ) -> Result<EventId, MatrixError>;
    /// Batched historical send with caller-supplied deterministic IDs.
    /// Implementations must reject the call when `supports_batch_send` is
    /// false rather than silently falling back.
    async fn batch_send(
        &self,
        room: &RoomId,
        events: &[BatchEvent],
    ) -> Result<Vec<EventId>, MatrixError>;

    // -- media --------------------------------------------------------------

    async fn upload_media(
        &self,
        data: Vec<u8>,
        mime: &str,
        filename: &str,
    ) -> Result<ContentUri, MatrixError>;
    async fn download_media(&self, uri: &ContentUri) -> Result<Vec<u8>, MatrixError>;

    // -- ephemeral ----------------------------------------------------------

    async fn set_typing(
        &self,
        room: &RoomId,
        user: &Mxid,
        timeout_ms: u64,
    ) -> Result<(), MatrixError>;
    /// Mark-read as the local user's double puppet; callers must check
    /// `double_puppet_of` first.
    async fn mark_read(
        &self,
        room: &RoomId,
        user: &Mxid,
        event_id: &EventId,
    ) -> Result<(), MatrixError>;

    // -- double puppeting ---------------------------------------------------

    /// The double-puppet intent for a local user, when one is logged in.
    async fn double_puppet_of(&self, user: &Mxid) -> Option<Mxid>;
}
