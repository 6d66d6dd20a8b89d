//! Recording homeserver.
//!
//! Every call is recorded for assertions; event and room IDs are allocated
//! from a counter. Batch send and auto-join are toggles so tests can cover
//! both capability paths.

use async_trait::async_trait;
use sb_matrix::client::{BatchEvent, Homeserver, MatrixError, RoomCreateArgs};
use sb_matrix::content::{MessageContent, ReactionContent};
use sb_matrix::{ContentUri, EventId, Mxid, RoomId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub room: RoomId,
    pub sender: Mxid,
    pub content: MessageContent,
    pub ts: Option<i64>,
    pub event_id: EventId,
}

#[derive(Debug, Clone)]
pub struct SentReaction {
    pub room: RoomId,
    pub sender: Mxid,
    pub content: ReactionContent,
    pub event_id: EventId,
}

#[derive(Debug, Clone)]
pub struct SentRedaction {
    pub room: RoomId,
    pub sender: Mxid,
    pub redacts: EventId,
    pub reason: String,
}

pub struct MockHomeserver {
    domain: String,
    batch_send_enabled: bool,
    auto_join: bool,
    counter: AtomicU64,

    pub created_rooms: Mutex<Vec<(RoomId, RoomCreateArgs)>>,
    pub messages: Mutex<Vec<SentMessage>>,
    pub reactions: Mutex<Vec<SentReaction>>,
    pub redactions: Mutex<Vec<SentRedaction>>,
    pub state_events: Mutex<Vec<(RoomId, String, String, Value)>>,
    pub invites: Mutex<Vec<(RoomId, Mxid)>>,
    pub joins: Mutex<Vec<(RoomId, Mxid)>>,
    pub kicks: Mutex<Vec<(RoomId, Mxid, String)>>,
    pub leaves: Mutex<Vec<(RoomId, Mxid)>>,
    pub typing: Mutex<Vec<(RoomId, Mxid, u64)>>,
    pub read_receipts: Mutex<Vec<(RoomId, Mxid, EventId)>>,
    pub display_names: Mutex<Vec<(Mxid, String)>>,
    pub uploads: Mutex<Vec<(String, String, usize)>>,
    pub batches: Mutex<Vec<(RoomId, Vec<BatchEvent>)>>,
    pub media: Mutex<HashMap<ContentUri, Vec<u8>>>,
    pub double_puppets: Mutex<HashMap<Mxid, Mxid>>,
}

impl MockHomeserver {
    pub fn new(domain: &str) -> MockHomeserver {
        MockHomeserver::with_capabilities(domain, false, false)
    }

    pub fn with_capabilities(
        domain: &str,
        batch_send_enabled: bool,
        auto_join: bool,
    ) -> MockHomeserver {
        MockHomeserver {
            domain: domain.to_owned(),
            batch_send_enabled,
            auto_join,
            counter: AtomicU64::new(1),
            created_rooms: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            reactions: Mutex::new(Vec::new()),
            redactions: Mutex::new(Vec::new()),
            state_events: Mutex::new(Vec::new()),
            invites: Mutex::new(Vec::new()),
            joins: Mutex::new(Vec::new()),
            kicks: Mutex::new(Vec::new()),
            leaves: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
            read_receipts: Mutex::new(Vec::new()),
            display_names: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            media: Mutex::new(HashMap::new()),
            double_puppets: Mutex::new(HashMap::new()),
        }
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn set_double_puppet(&self, user: &str, intent: &str) {
        self.double_puppets
            .lock()
            .unwrap()
            .insert(user.to_owned(), intent.to_owned());
    }

    /// Messages sent into a specific room, in send order.
    pub fn messages_in(&self, room: &str) -> Vec<SentMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.room == room)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Homeserver for MockHomeserver {
    fn supports_batch_send(&self) -> bool {
        self.batch_send_enabled
    }

    fn auto_join_invites(&self) -> bool {
        self.auto_join
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn bot_mxid(&self) -> Mxid {
        format!("@slackbot:{}", self.domain)
    }

    async fn create_room(&self, args: &RoomCreateArgs) -> Result<RoomId, MatrixError> {
        let room = format!("!room{}:{}", self.next(), self.domain);
        self.created_rooms
            .lock()
            .unwrap()
            .push((room.clone(), args.clone()));
        Ok(room)
    }

    async fn set_room_name(&self, room: &RoomId, name: &str) -> Result<(), MatrixError> {
        self.state_events.lock().unwrap().push((
            room.clone(),
            "m.room.name".to_owned(),
            String::new(),
            serde_json::json!({ "name": name }),
        ));
        Ok(())
    }

    async fn set_room_topic(&self, room: &RoomId, topic: &str) -> Result<(), MatrixError> {
        self.state_events.lock().unwrap().push((
            room.clone(),
            "m.room.topic".to_owned(),
            String::new(),
            serde_json::json!({ "topic": topic }),
        ));
        Ok(())
    }

    async fn set_room_avatar(
        &self,
        room: &RoomId,
        avatar: &ContentUri,
    ) -> Result<(), MatrixError> {
        self.state_events.lock().unwrap().push((
            room.clone(),
            "m.room.avatar".to_owned(),
            String::new(),
            serde_json::json!({ "url": avatar }),
        ));
        Ok(())
    }

    async fn send_state(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<EventId, MatrixError> {
        self.state_events.lock().unwrap().push((
            room.clone(),
            event_type.to_owned(),
            state_key.to_owned(),
            content,
        ));
        Ok(format!("$state{}", self.next()))
    }

    async fn add_to_space(&self, space: &RoomId, child: &RoomId) -> Result<(), MatrixError> {
        self.state_events.lock().unwrap().push((
            space.clone(),
            "m.space.child".to_owned(),
            child.clone(),
            serde_json::json!({ "via": [self.domain] }),
        ));
        Ok(())
    }

    async fn invite(&self, room: &RoomId, user: &Mxid) -> Result<(), MatrixError> {
        self.invites
            .lock()
            .unwrap()
            .push((room.clone(), user.clone()));
        Ok(())
    }

    async fn join_as(&self, room: &RoomId, user: &Mxid) -> Result<(), MatrixError> {
        self.joins
            .lock()
            .unwrap()
            .push((room.clone(), user.clone()));
        Ok(())
    }

    async fn kick(&self, room: &RoomId, user: &Mxid, reason: &str) -> Result<(), MatrixError> {
        self.kicks
            .lock()
            .unwrap()
            .push((room.clone(), user.clone(), reason.to_owned()));
        Ok(())
    }

    async fn leave_as(&self, room: &RoomId, user: &Mxid) -> Result<(), MatrixError> {
        self.leaves
            .lock()
            .unwrap()
            .push((room.clone(), user.clone()));
        Ok(())
    }

    async fn set_ghost_display_name(&self, ghost: &Mxid, name: &str) -> Result<(), MatrixError> {
        self.display_names
            .lock()
            .unwrap()
            .push((ghost.clone(), name.to_owned()));
        Ok(())
    }

    async fn set_ghost_avatar(
        &self,
        _ghost: &Mxid,
        _avatar: &ContentUri,
    ) -> Result<(), MatrixError> {
        Ok(())
    }

    async fn send_message(
        &self,
        room: &RoomId,
        sender: &Mxid,
        content: &MessageContent,
        ts: Option<i64>,
    ) -> Result<EventId, MatrixError> {
        let event_id = format!("$evt{}", self.next());
        self.messages.lock().unwrap().push(SentMessage {
            room: room.clone(),
            sender: sender.clone(),
            content: content.clone(),
            ts,
            event_id: event_id.clone(),
        });
        Ok(event_id)
    }

    async fn send_reaction(
        &self,
        room: &RoomId,
        sender: &Mxid,
        content: &ReactionContent,
    ) -> Result<EventId, MatrixError> {
        let event_id = format!("$reaction{}", self.next());
        self.reactions.lock().unwrap().push(SentReaction {
            room: room.clone(),
            sender: sender.clone(),
            content: content.clone(),
            event_id: event_id.clone(),
        });
        Ok(event_id)
    }

    async fn redact(
        &self,
        room: &RoomId,
        sender: &Mxid,
        event_id: &EventId,
        reason: &str,
    ) -> Result<EventId, MatrixError> {
        self.redactions.lock().unwrap().push(SentRedaction {
            room: room.clone(),
            sender: sender.clone(),
            redacts: event_id.clone(),
            reason: reason.to_owned(),
        });
        Ok(format!("$redaction{}", self.next()))
    }

    async fn batch_send(
        &self,
        room: &RoomId,
        events: &[BatchEvent],
    ) -> Result<Vec<EventId>, MatrixError> {
        if !self.batch_send_enabled {
            return Err(MatrixError::NotSupported("batch send"));
        }
        self.batches
            .lock()
            .unwrap()
            .push((room.clone(), events.to_vec()));
        Ok(events.iter().map(|e| e.event_id.clone()).collect())
    }

    async fn upload_media(
        &self,
        data: Vec<u8>,
        mime: &str,
        filename: &str,
    ) -> Result<ContentUri, MatrixError> {
        let uri = format!("mxc://{}/media{}", self.domain, self.next());
        self.uploads
            .lock()
            .unwrap()
            .push((filename.to_owned(), mime.to_owned(), data.len()));
        self.media.lock().unwrap().insert(uri.clone(), data);
        Ok(uri)
    }

    async fn download_media(&self, uri: &ContentUri) -> Result<Vec<u8>, MatrixError> {
        self.media
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| MatrixError::Http(format!("unknown media {}", uri)))
    }

    async fn set_typing(
        &self,
        room: &RoomId,
        user: &Mxid,
        timeout_ms: u64,
    ) -> Result<(), MatrixError> {
        self.typing
            .lock()
            .unwrap()
            .push((room.clone(), user.clone(), timeout_ms));
        Ok(())
    }

    async fn mark_read(
        &self,
        room: &RoomId,
        user: &Mxid,
        event_id: &EventId,
    ) -> Result<(), MatrixError> {
        self.read_receipts
            .lock()
            .unwrap()
            .push((room.clone(), user.clone(), event_id.clone()));
        Ok(())
    }

    async fn double_puppet_of(&self, user: &Mxid) -> Option<Mxid> {
        self.double_puppets.lock().unwrap().get(user).cloned()
    }
}
