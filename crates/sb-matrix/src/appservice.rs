//! Thin appservice-token client for the consumed homeserver endpoints.
//!
//! This is deliberately minimal: the bridge core only talks through the
//! `Homeserver` trait, and this adapter maps each trait call onto one
//! client-server API request, impersonating ghosts via the appservice
//! `user_id` query parameter. Encryption and double puppeting live behind
//! other collaborators and are not implemented here.

use crate::client::{BatchEvent, Homeserver, MatrixError, RoomCreateArgs};
use crate::content::{MessageContent, ReactionContent};
use crate::{ContentUri, EventId, Mxid, RoomId};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub struct AppserviceClient {
    http: reqwest::Client,
    base_url: String,
    as_token: String,
    domain: String,
    bot_localpart: String,
    batch_send: bool,
    auto_join: bool,
    txn: AtomicU64,
}

impl AppserviceClient {
    pub fn new(
        base_url: &str,
        as_token: &str,
        domain: &str,
        bot_localpart: &str,
        batch_send: bool,
        auto_join: bool,
    ) -> AppserviceClient {
        AppserviceClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            as_token: as_token.to_owned(),
            domain: domain.to_owned(),
            bot_localpart: bot_localpart.to_owned(),
            batch_send,
            auto_join,
            txn: AtomicU64::new(1),
        }
    }

    fn next_txn(&self) -> u64 {
        self.txn.fetch_add(1, Ordering::Relaxed)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        user_id: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value, MatrixError> {
        debug!(%path, "homeserver call");
        let mut req = self
            .http
            .request(method, self.url(path))
            .bearer_auth(&self.as_token);
        if let Some(user_id) = user_id {
            req = req.query(&[("user_id", user_id)]);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MatrixError::Http(e.to_string()))?;
        let status = resp.status();
        let value: Value = resp
            .json()
            .await
            .map_err(|e| MatrixError::Serialization(e.to_string()))?;
        if !status.is_success() {
            let errcode = value
                .get("errcode")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(MatrixError::Http(format!("{}: {}", status, errcode)));
        }
        Ok(value)
    }

    fn event_id_of(value: &Value) -> Result<EventId, MatrixError> {
        value
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| MatrixError::Serialization("missing event_id".to_owned()))
    }

    fn ts_query(ts: Option<i64>) -> String {
        ts.map(|ts| format!("?ts={}", ts)).unwrap_or_default()
    }
}

#[async_trait]
impl Homeserver for AppserviceClient {
    fn supports_batch_send(&self) -> bool {
        self.batch_send
    }

    fn auto_join_invites(&self) -> bool {
        self.auto_join
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn bot_mxid(&self) -> Mxid {
        format!("@{}:{}", self.bot_localpart, self.domain)
    }

    async fn create_room(&self, args: &RoomCreateArgs) -> Result<RoomId, MatrixError> {
        let mut creation_content = json!({ "m.federate": args.federate });
        if args.is_space {
            creation_content["type"] = json!("m.space");
        }
        let mut initial_state = vec![json!({
            "type": "uk.half-shot.bridge",
            "state_key": args.bridge_info_state_key,
            "content": serde_json::to_value(&args.bridge_info)
                .map_err(|e| MatrixError::Serialization(e.to_string()))?,
        })];
        if args.encrypted {
            initial_state.push(json!({
                "type": "m.room.encryption",
                "state_key": "",
                "content": {"algorithm": "m.megolm.v1.aes-sha2"},
            }));
        }
        if let Some(avatar) = &args.avatar_url {
            initial_state.push(json!({
                "type": "m.room.avatar",
                "state_key": "",
                "content": {"url": avatar},
            }));
        }
        if let Some(space) = &args.space_parent {
            initial_state.push(json!({
                "type": "m.space.parent",
                "state_key": space,
                "content": {"via": [self.domain], "canonical": true},
            }));
        }
        let mut body = json!({
            "visibility": "private",
            "invite": args.invite,
            "is_direct": args.is_direct,
            "creation_content": creation_content,
            "initial_state": initial_state,
        });
        if let Some(name) = &args.name {
            body["name"] = json!(name);
        }
        if let Some(topic) = &args.topic {
            body["topic"] = json!(topic);
        }
        let value = self
            .request(
                reqwest::Method::POST,
                "/_matrix/client/v3/createRoom",
                None,
                Some(body),
            )
            .await?;
        value
            .get("room_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| MatrixError::Serialization("missing room_id".to_owned()))
    }

    async fn set_room_name(&self, room: &RoomId, name: &str) -> Result<(), MatrixError> {
        self.send_state(room, "m.room.name", "", json!({ "name": name }))
            .await
            .map(|_| ())
    }

    async fn set_room_topic(&self, room: &RoomId, topic: &str) -> Result<(), MatrixError> {
        self.send_state(room, "m.room.topic", "", json!({ "topic": topic }))
            .await
            .map(|_| ())
    }

    async fn set_room_avatar(
        &self,
        room: &RoomId,
        avatar: &ContentUri,
    ) -> Result<(), MatrixError> {
        self.send_state(room, "m.room.avatar", "", json!({ "url": avatar }))
            .await
            .map(|_| ())
    }

    async fn send_state(
        &self,
        room: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<EventId, MatrixError> {
        let value = self
            .request(
                reqwest::Method::PUT,
                &format!(
                    "/_matrix/client/v3/rooms/{}/state/{}/{}",
                    room, event_type, state_key
                ),
                None,
                Some(content),
            )
            .await?;
        Self::event_id_of(&value)
    }

    async fn add_to_space(&self, space: &RoomId, child: &RoomId) -> Result<(), MatrixError> {
        self.send_state(
            space,
            "m.space.child",
            child,
            json!({"via": [self.domain]}),
        )
        .await
        .map(|_| ())
    }

    async fn invite(&self, room: &RoomId, user: &Mxid) -> Result<(), MatrixError> {
        self.request(
            reqwest::Method::POST,
            &format!("/_matrix/client/v3/rooms/{}/invite", room),
            None,
            Some(json!({ "user_id": user })),
        )
        .await
        .map(|_| ())
    }

    async fn join_as(&self, room: &RoomId, user: &Mxid) -> Result<(), MatrixError> {
        self.request(
            reqwest::Method::POST,
            &format!("/_matrix/client/v3/rooms/{}/join", room),
            Some(user),
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn kick(&self, room: &RoomId, user: &Mxid, reason: &str) -> Result<(), MatrixError> {
        self.request(
            reqwest::Method::POST,
            &format!("/_matrix/client/v3/rooms/{}/kick", room),
            None,
            Some(json!({ "user_id": user, "reason": reason })),
        )
        .await
        .map(|_| ())
    }

    async fn leave_as(&self, room: &RoomId, user: &Mxid) -> Result<(), MatrixError> {
        self.request(
            reqwest::Method::POST,
            &format!("/_matrix/client/v3/rooms/{}/leave", room),
            Some(user),
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn set_ghost_display_name(&self, ghost: &Mxid, name: &str) -> Result<(), MatrixError> {
        self.request(
            reqwest::Method::PUT,
            &format!("/_matrix/client/v3/profile/{}/displayname", ghost),
            Some(ghost),
            Some(json!({ "displayname": name })),
        )
        .await
        .map(|_| ())
    }

    async fn set_ghost_avatar(&self, ghost: &Mxid, avatar: &ContentUri) -> Result<(), MatrixError> {
        self.request(
            reqwest::Method::PUT,
            &format!("/_matrix/client/v3/profile/{}/avatar_url", ghost),
            Some(ghost),
            Some(json!({ "avatar_url": avatar })),
        )
        .await
        .map(|_| ())
    }

    async fn send_message(
        &self,
        room: &RoomId,
        sender: &Mxid,
        content: &MessageContent,
        ts: Option<i64>,
    ) -> Result<EventId, MatrixError> {
        let body = serde_json::to_value(content)
            .map_err(|e| MatrixError::Serialization(e.to_string()))?;
        let value = self
            .request(
                reqwest::Method::PUT,
                &format!(
                    "/_matrix/client/v3/rooms/{}/send/m.room.message/{}{}",
                    room,
                    self.next_txn(),
                    Self::ts_query(ts)
                ),
                Some(sender),
                Some(body),
            )
            .await?;
        Self::event_id_of(&value)
    }

    async fn send_reaction(
        &self,
        room: &RoomId,
        sender: &Mxid,
        content: &ReactionContent,
    ) -> Result<EventId, MatrixError> {
        let body = serde_json::to_value(content)
            .map_err(|e| MatrixError::Serialization(e.to_string()))?;
        let value = self
            .request(
                reqwest::Method::PUT,
                &format!(
                    "/_matrix/client/v3/rooms/{}/send/m.reaction/{}",
                    room,
                    self.next_txn()
                ),
                Some(sender),
                Some(body),
            )
            .await?;
        Self::event_id_of(&value)
    }

    async fn redact(
        &self,
        room: &RoomId,
        sender: &Mxid,
        event_id: &EventId,
        reason: &str,
    ) -> Result<EventId, MatrixError> {
        let body = if reason.is_empty() {
            json!({})
        } else {
            json!({ "reason": reason })
        };
        let value = self
            .request(
                reqwest::Method::PUT,
                &format!(
                    "/_matrix/client/v3/rooms/{}/redact/{}/{}",
                    room,
                    event_id,
                    self.next_txn()
                ),
                Some(sender),
                Some(body),
            )
            .await?;
        Self::event_id_of(&value)
    }

    async fn batch_send(
        &self,
        room: &RoomId,
        events: &[BatchEvent],
    ) -> Result<Vec<EventId>, MatrixError> {
        if !self.batch_send {
            return Err(MatrixError::NotSupported("batch send"));
        }
        let body = json!({
            "events": events
                .iter()
                .map(|e| {
                    json!({
                        "event_id": e.event_id,
                        "sender": e.sender,
                        "type": e.event_type,
                        "content": e.content,
                        "origin_server_ts": e.origin_server_ts,
                    })
                })
                .collect::<Vec<Value>>(),
        });
        let value = self
            .request(
                reqwest::Method::POST,
                &format!(
                    "/_matrix/client/unstable/org.matrix.msc2716/rooms/{}/batch_send",
                    room
                ),
                None,
                Some(body),
            )
            .await?;
        let ids = value
            .get("event_ids")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_else(|| events.iter().map(|e| e.event_id.clone()).collect());
        Ok(ids)
    }

    async fn upload_media(
        &self,
        data: Vec<u8>,
        mime: &str,
        filename: &str,
    ) -> Result<ContentUri, MatrixError> {
        let resp = self
            .http
            .post(self.url("/_matrix/media/v3/upload"))
            .query(&[("filename", filename)])
            .bearer_auth(&self.as_token)
            .header("Content-Type", mime)
            .body(data)
            .send()
            .await
            .map_err(|e| MatrixError::Http(e.to_string()))?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| MatrixError::Serialization(e.to_string()))?;
        value
            .get("content_uri")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| MatrixError::Serialization("missing content_uri".to_owned()))
    }

    async fn download_media(&self, uri: &ContentUri) -> Result<Vec<u8>, MatrixError> {
        let rest = uri
            .strip_prefix("mxc://")
            .ok_or_else(|| MatrixError::Http(format!("not an mxc URI: {}", uri)))?;
        let resp = self
            .http
            .get(self.url(&format!("/_matrix/media/v3/download/{}", rest)))
            .bearer_auth(&self.as_token)
            .send()
            .await
            .map_err(|e| MatrixError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MatrixError::Http(format!(
                "media download returned {}",
                resp.status()
            )));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| MatrixError::Http(e.to_string()))
    }

    async fn set_typing(
        &self,
        room: &RoomId,
        user: &Mxid,
        timeout_ms: u64,
    ) -> Result<(), MatrixError> {
        self.request(
            reqwest::Method::PUT,
            &format!("/_matrix/client/v3/rooms/{}/typing/{}", room, user),
            Some(user),
            Some(json!({ "typing": true, "timeout": timeout_ms })),
        )
        .await
        .map(|_| ())
    }

    async fn mark_read(
        &self,
        room: &RoomId,
        user: &Mxid,
        event_id: &EventId,
    ) -> Result<(), MatrixError> {
        self.request(
            reqwest::Method::POST,
            &format!("/_matrix/client/v3/rooms/{}/receipt/m.read/{}", room, event_id),
            Some(user),
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn double_puppet_of(&self, _user: &Mxid) -> Option<Mxid> {
        // Double-puppet login is a separate collaborator; without it the
        // bridge always acts through ghosts and the bot.
        None
    }
}
