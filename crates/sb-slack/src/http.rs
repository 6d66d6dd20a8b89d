//! Production `SlackClient` over the Slack Web API.
//!
//! Every call posts to `https://slack.com/api/<method>` and unwraps the
//! `{ "ok": bool, "error": ... }` envelope. User tokens (`xoxc-`/`xoxs-`)
//! may require the session cookie `d`, sent alongside the bearer token.

use crate::blocks::Block;
use crate::client::{
    HistoryRequest, PostMessageRequest, SlackClient, SlackError, UpdateMessageRequest,
};
use crate::rtm::RtmHandle;
use crate::types::{
    ClientBoot, Conversation, ConversationCounts, EmojiMap, File, FileShares, HistoryPage,
    PostMessageResponse, TeamInfo, UploadUrl, UserInfo,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Mutex;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://slack.com/api";

/// HTTP implementation of the Slack contract.
pub struct HttpSlackClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    cookie: Option<String>,
    rtm: Mutex<Option<RtmHandle>>,
}

impl HttpSlackClient {
    pub fn new(token: &str, cookie: Option<&str>) -> HttpSlackClient {
        HttpSlackClient::with_base_url(DEFAULT_BASE_URL, token, cookie)
    }

    /// Custom base URL for tests pointing at a local stub.
    pub fn with_base_url(base_url: &str, token: &str, cookie: Option<&str>) -> HttpSlackClient {
        HttpSlackClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
            cookie: cookie.map(str::to_owned),
            rtm: Mutex::new(None),
        }
    }

    /// Attach the RTM socket handle used for typing signals.
    pub fn attach_rtm(&self, handle: RtmHandle) {
        *self.rtm.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    // -----------------------------------------------------------------------
    // Envelope plumbing
    // -----------------------------------------------------------------------

    fn request(&self, method: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.token);
        if let Some(cookie) = &self.cookie {
            req = req.header("Cookie", format!("d={}", cookie));
        }
        req
    }

    async fn unwrap_envelope(method: &str, resp: reqwest::Response) -> Result<Value, SlackError> {
        let value: Value = resp
            .json()
            .await
            .map_err(|e| SlackError::Serialization(e.to_string()))?;
        if value.get("ok").and_then(Value::as_bool) != Some(true) {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            return Err(SlackError::api(method, error));
        }
        Ok(value)
    }

    async fn call_form(&self, method: &str, form: &[(&str, String)]) -> Result<Value, SlackError> {
        debug!(method, "slack api call");
        let resp = self
            .request(method)
            .form(form)
            .send()
            .await
            .map_err(|e| SlackError::Http(e.to_string()))?;
        Self::unwrap_envelope(method, resp).await
    }

    async fn call_json(&self, method: &str, body: &Value) -> Result<Value, SlackError> {
        debug!(method, "slack api call");
        let resp = self
            .request(method)
            .json(body)
            .send()
            .await
            .map_err(|e| SlackError::Http(e.to_string()))?;
        Self::unwrap_envelope(method, resp).await
    }

    fn extract<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, SlackError> {
        serde_json::from_value(value)
            .map_err(|e| SlackError::Serialization(format!("{}: {}", method, e)))
    }

    fn field<T: DeserializeOwned>(method: &str, value: &Value, key: &str) -> Result<T, SlackError> {
        let field = value
            .get(key)
            .cloned()
            .ok_or_else(|| SlackError::api(method, format!("missing `{}` field", key)))?;
        Self::extract(method, field)
    }
}

#[async_trait]
impl SlackClient for HttpSlackClient {
    async fn connect_stream(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<crate::events::SlackEvent>, SlackError> {
        // Bot sessions use socket mode; real users use the RTM socket.
        let socket_mode = self.token.starts_with("xapp-") || self.token.starts_with("xoxb-");
        let method = if socket_mode {
            "apps.connections.open"
        } else {
            "rtm.connect"
        };
        let value = self.call_form(method, &[]).await?;
        let ws_url = value
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| SlackError::api(method, "missing url"))?;
        let (handle, events) = crate::rtm::connect(ws_url, socket_mode).await?;
        self.attach_rtm(handle);
        Ok(events)
    }

    async fn team_info(&self) -> Result<TeamInfo, SlackError> {
        let value = self.call_form("team.info", &[]).await?;
        Self::field("team.info", &value, "team")
    }

    async fn client_boot(&self) -> Result<ClientBoot, SlackError> {
        let value = self.call_form("client.userBoot", &[]).await?;
        Self::extract("client.userBoot", value)
    }

    async fn client_counts(&self) -> Result<Vec<ConversationCounts>, SlackError> {
        let value = self.call_form("client.counts", &[]).await?;
        let mut counts: Vec<ConversationCounts> = Vec::new();
        for key in ["channels", "mpims", "ims"] {
            if let Some(section) = value.get(key) {
                let mut parsed: Vec<ConversationCounts> =
                    Self::extract("client.counts", section.clone())?;
                counts.append(&mut parsed);
            }
        }
        Ok(counts)
    }

    async fn auth_signout(&self) -> Result<(), SlackError> {
        self.call_form("auth.signout", &[]).await.map(|_| ())
    }

    async fn conversation_info(&self, channel: &str) -> Result<Conversation, SlackError> {
        let value = self
            .call_form("conversations.info", &[("channel", channel.to_owned())])
            .await?;
        Self::field("conversations.info", &value, "channel")
    }

    async fn list_conversations(
        &self,
        cursor: &str,
        limit: u32,
    ) -> Result<(Vec<Conversation>, String), SlackError> {
        let mut form = vec![
            (
                "types",
                "public_channel,private_channel,mpim,im".to_owned(),
            ),
            ("limit", limit.min(100).to_string()),
        ];
        if !cursor.is_empty() {
            form.push(("cursor", cursor.to_owned()));
        }
        let value = self.call_form("conversations.list", &form).await?;
        let channels: Vec<Conversation> = Self::field("conversations.list", &value, "channels")?;
        let next_cursor = value
            .pointer("/response_metadata/next_cursor")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();
        Ok((channels, next_cursor))
    }

    async fn conversation_members(
        &self,
        channel: &str,
        limit: u32,
    ) -> Result<Vec<String>, SlackError> {
        let value = self
            .call_form(
                "conversations.members",
                &[
                    ("channel", channel.to_owned()),
                    ("limit", limit.min(100).to_string()),
                ],
            )
            .await?;
        Self::field("conversations.members", &value, "members")
    }

    async fn open_conversation(&self, users: &[String]) -> Result<String, SlackError> {
        let value = self
            .call_form("conversations.open", &[("users", users.join(","))])
            .await?;
        value
            .pointer("/channel/id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| SlackError::api("conversations.open", "missing channel id"))
    }

    async fn conversation_history(&self, req: &HistoryRequest) -> Result<HistoryPage, SlackError> {
        let mut form = vec![
            ("channel", req.channel.clone()),
            ("limit", req.limit.to_string()),
        ];
        if let Some(latest) = &req.latest {
            form.push(("latest", latest.clone()));
        }
        if let Some(oldest) = &req.oldest {
            form.push(("oldest", oldest.clone()));
        }
        if req.inclusive {
            form.push(("inclusive", "true".to_owned()));
        }
        let value = self.call_form("conversations.history", &form).await?;
        Self::extract("conversations.history", value)
    }

    async fn mark_conversation(&self, channel: &str, ts: &str) -> Result<(), SlackError> {
        self.call_form(
            "conversations.mark",
            &[("channel", channel.to_owned()), ("ts", ts.to_owned())],
        )
        .await
        .map(|_| ())
    }

    async fn users_info(&self, user_ids: &[String]) -> Result<Vec<UserInfo>, SlackError> {
        let value = self
            .call_form("users.info", &[("users", user_ids.join(","))])
            .await?;
        // Batched requests return `users`; a single-ID request returns `user`.
        if value.get("users").is_some() {
            Self::field("users.info", &value, "users")
        } else {
            let single: UserInfo = Self::field("users.info", &value, "user")?;
            Ok(vec![single])
        }
    }

    async fn bot_info(&self, bot_id: &str) -> Result<UserInfo, SlackError> {
        let value = self
            .call_form("bots.info", &[("bot", bot_id.to_owned())])
            .await?;
        let name = value
            .pointer("/bot/name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();
        let avatar = value
            .pointer("/bot/icons/image_72")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();
        let mut user = UserInfo {
            id: bot_id.to_owned(),
            name,
            is_bot: true,
            ..UserInfo::default()
        };
        user.profile.image_512 = avatar;
        Ok(user)
    }

    async fn post_message(
        &self,
        req: &PostMessageRequest,
    ) -> Result<PostMessageResponse, SlackError> {
        let value = self
            .call_json("chat.postMessage", &message_body(req))
            .await?;
        Self::extract("chat.postMessage", value)
    }

    async fn update_message(
        &self,
        req: &UpdateMessageRequest,
    ) -> Result<PostMessageResponse, SlackError> {
        let mut body = json!({
            "channel": req.channel,
            "ts": req.ts,
            "text": req.text,
        });
        if !req.blocks.is_empty() {
            body["blocks"] = blocks_value(&req.blocks)?;
        }
        let value = self.call_json("chat.update", &body).await?;
        Self::extract("chat.update", value)
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), SlackError> {
        self.call_form(
            "chat.delete",
            &[("channel", channel.to_owned()), ("ts", ts.to_owned())],
        )
        .await
        .map(|_| ())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), SlackError> {
        self.call_form(
            "reactions.add",
            &[
                ("channel", channel.to_owned()),
                ("timestamp", ts.to_owned()),
                ("name", name.to_owned()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn remove_reaction(
        &self,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), SlackError> {
        self.call_form(
            "reactions.remove",
            &[
                ("channel", channel.to_owned()),
                ("timestamp", ts.to_owned()),
                ("name", name.to_owned()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn get_upload_url(&self, filename: &str, length: u64) -> Result<UploadUrl, SlackError> {
        let value = self
            .call_form(
                "files.getUploadURLExternal",
                &[
                    ("filename", filename.to_owned()),
                    ("length", length.to_string()),
                ],
            )
            .await?;
        Self::extract("files.getUploadURLExternal", value)
    }

    async fn upload_to_url(&self, url: &str, data: Vec<u8>) -> Result<(), SlackError> {
        let resp = self
            .http
            .post(url)
            .body(data)
            .send()
            .await
            .map_err(|e| SlackError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SlackError::Http(format!(
                "upload returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn complete_upload(
        &self,
        file_id: &str,
        title: &str,
        channel: &str,
        thread_ts: Option<&str>,
    ) -> Result<String, SlackError> {
        let mut body = json!({
            "files": [{"id": file_id, "title": title}],
            "channel_id": channel,
        });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = json!(ts);
        }
        let value = self
            .call_json("files.completeUploadExternal", &body)
            .await?;
        let shares: FileShares = value
            .pointer("/files/0/shares")
            .cloned()
            .map(|v| Self::extract("files.completeUploadExternal", v))
            .transpose()?
            .unwrap_or_default();
        share_ts(&shares, channel)
            .ok_or_else(|| SlackError::api("files.completeUploadExternal", "missing share info"))
    }

    async fn upload_file_legacy(
        &self,
        channel: &str,
        filename: &str,
        data: Vec<u8>,
        thread_ts: Option<&str>,
    ) -> Result<(File, FileShares), SlackError> {
        let part = reqwest::multipart::Part::bytes(data).file_name(filename.to_owned());
        let mut form = reqwest::multipart::Form::new()
            .text("channels", channel.to_owned())
            .text("filename", filename.to_owned())
            .part("file", part);
        if let Some(ts) = thread_ts {
            form = form.text("thread_ts", ts.to_owned());
        }
        let resp = self
            .request("files.upload")
            .multipart(form)
            .send()
            .await
            .map_err(|e| SlackError::Http(e.to_string()))?;
        let value = Self::unwrap_envelope("files.upload", resp).await?;
        let file: File = Self::field("files.upload", &value, "file")?;
        let shares: FileShares = value
            .pointer("/file/shares")
            .cloned()
            .map(|v| Self::extract("files.upload", v))
            .transpose()?
            .unwrap_or_default();
        Ok((file, shares))
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>, SlackError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SlackError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SlackError::Http(format!(
                "download returned {}",
                resp.status()
            )));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| SlackError::Http(e.to_string()))
    }

    async fn emoji_list(&self) -> Result<EmojiMap, SlackError> {
        let value = self.call_form("emoji.list", &[]).await?;
        Self::field("emoji.list", &value, "emoji")
    }

    async fn send_typing(&self, channel: &str) -> Result<(), SlackError> {
        let handle = self
            .rtm
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        match handle {
            Some(rtm) => rtm.send_typing(channel).await,
            None => Ok(()),
        }
    }
}

/// Pick the share timestamp for a channel: private shares first, then public.
pub fn share_ts(shares: &FileShares, channel: &str) -> Option<String> {
    let pick = |entries: Option<&Vec<crate::types::ShareEntry>>| {
        entries.and_then(|list| list.first()).map(|e| e.ts.clone())
    };
    pick(shares.private.get(channel)).or_else(|| pick(shares.public.get(channel)))
}

fn message_body(req: &PostMessageRequest) -> Value {
    let mut body = json!({
        "channel": req.channel,
        "text": req.text,
    });
    if !req.blocks.is_empty() {
        if let Ok(blocks) = blocks_value(&req.blocks) {
            body["blocks"] = blocks;
        }
    }
    if let Some(ts) = &req.thread_ts {
        body["thread_ts"] = json!(ts);
    }
    body
}

fn blocks_value(blocks: &[Block]) -> Result<Value, SlackError> {
    serde_json::to_value(blocks).map_err(|e| SlackError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ShareEntry;

    fn shares_with(channel: &str, ts: &str, public: bool) -> FileShares {
        let mut shares = FileShares::default();
        let entry = vec![ShareEntry { ts: ts.to_owned() }];
        if public {
            shares.public.insert(channel.to_owned(), entry);
        } else {
            shares.private.insert(channel.to_owned(), entry);
        }
        shares
    }

    #[test]
    fn share_ts_prefers_private() {
        let mut shares = shares_with("C1", "2.0", true);
        shares
            .private
            .insert("C1".to_owned(), vec![ShareEntry { ts: "1.0".into() }]);
        assert_eq!(share_ts(&shares, "C1").as_deref(), Some("1.0"));
    }

    #[test]
    fn share_ts_falls_back_to_public() {
        let shares = shares_with("C1", "2.0", true);
        assert_eq!(share_ts(&shares, "C1").as_deref(), Some("2.0"));
        assert_eq!(share_ts(&shares, "C2"), None);
    }
}
