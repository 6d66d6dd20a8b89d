//! The Slack client contract consumed by the bridge core.
//!
//! The core never talks HTTP directly; it holds an `Arc<dyn SlackClient>`
//! so tests can substitute a scripted implementation. `http::HttpSlackClient`
//! is the production implementation.

use crate::blocks::Block;
use crate::types::{
    ClientBoot, Conversation, ConversationCounts, EmojiMap, File, FileShares, HistoryPage,
    PostMessageResponse, TeamInfo, UploadUrl, UserInfo,
};
use async_trait::async_trait;
use std::fmt;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum SlackError {
    /// Slack replied `ok: false`; carries the API method and error string.
    Api { method: String, error: String },
    Http(String),
    Ws(String),
    Serialization(String),
    Disconnected,
}

impl SlackError {
    pub fn api(method: &str, error: impl Into<String>) -> SlackError {
        SlackError::Api {
            method: method.to_owned(),
            error: error.into(),
        }
    }

    /// True when the error means the stored tokens are no longer accepted
    /// and the session must stop rather than retry.
    pub fn is_auth_invalidated(&self) -> bool {
        match self {
            SlackError::Api { error, .. } => matches!(
                error.as_str(),
                "invalid_auth"
                    | "not_authed"
                    | "account_inactive"
                    | "token_revoked"
                    | "token_expired"
                    | "user_removed_from_team"
            ),
            _ => false,
        }
    }
}

impl fmt::Display for SlackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlackError::Api { method, error } => write!(f, "{} failed: {}", method, error),
            SlackError::Http(s) => write!(f, "HTTP error: {}", s),
            SlackError::Ws(s) => write!(f, "WebSocket error: {}", s),
            SlackError::Serialization(s) => write!(f, "Serialization error: {}", s),
            SlackError::Disconnected => write!(f, "stream disconnected"),
        }
    }
}

impl std::error::Error for SlackError {}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// A structured outbound message. `blocks` wins over `text` when non-empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostMessageRequest {
    pub channel: String,
    pub text: String,
    pub blocks: Vec<Block>,
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateMessageRequest {
    pub channel: String,
    pub ts: String,
    pub text: String,
    pub blocks: Vec<Block>,
}

/// Parameters for a history fetch; `latest`/`oldest` bound the window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryRequest {
    pub channel: String,
    pub latest: Option<String>,
    pub oldest: Option<String>,
    pub limit: u32,
    pub inclusive: bool,
}

// ---------------------------------------------------------------------------
// The contract
// ---------------------------------------------------------------------------

/// Everything the bridge core needs from the Slack Web API.
///
/// One instance per authenticated session; the token is captured at
/// construction.
#[async_trait]
pub trait SlackClient: Send + Sync {
    // -- streaming ----------------------------------------------------------

    /// Open the streaming connection and return its event channel. The
    /// channel closing means the stream dropped; reconnecting is the
    /// session's job.
    async fn connect_stream(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<crate::events::SlackEvent>, SlackError>;

    // -- identity / team ----------------------------------------------------

    async fn team_info(&self) -> Result<TeamInfo, SlackError>;
    async fn client_boot(&self) -> Result<ClientBoot, SlackError>;
    async fn client_counts(&self) -> Result<Vec<ConversationCounts>, SlackError>;
    /// Best-effort session teardown; errors are the caller's to ignore.
    async fn auth_signout(&self) -> Result<(), SlackError>;

    // -- conversations ------------------------------------------------------

    async fn conversation_info(&self, channel: &str) -> Result<Conversation, SlackError>;
    /// One page of the conversation list. Page size is capped at 100 by the
    /// API; `cursor` is empty for the first page.
    async fn list_conversations(
        &self,
        cursor: &str,
        limit: u32,
    ) -> Result<(Vec<Conversation>, String), SlackError>;
    async fn conversation_members(
        &self,
        channel: &str,
        limit: u32,
    ) -> Result<Vec<String>, SlackError>;
    async fn open_conversation(&self, users: &[String]) -> Result<String, SlackError>;
    async fn conversation_history(&self, req: &HistoryRequest) -> Result<HistoryPage, SlackError>;
    async fn mark_conversation(&self, channel: &str, ts: &str) -> Result<(), SlackError>;

    // -- users --------------------------------------------------------------

    /// Batched `users.info`; the response covers all requested IDs that exist.
    async fn users_info(&self, user_ids: &[String]) -> Result<Vec<UserInfo>, SlackError>;
    async fn bot_info(&self, bot_id: &str) -> Result<UserInfo, SlackError>;

    // -- messages -----------------------------------------------------------

    async fn post_message(
        &self,
        req: &PostMessageRequest,
    ) -> Result<PostMessageResponse, SlackError>;
    async fn update_message(
        &self,
        req: &UpdateMessageRequest,
    ) -> Result<PostMessageResponse, SlackError>;
    async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), SlackError>;

    // -- reactions ----------------------------------------------------------

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), SlackError>;
    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str)
        -> Result<(), SlackError>;

    // -- files --------------------------------------------------------------

    /// Step 1 of the streaming upload: reserve an upload URL.
    async fn get_upload_url(&self, filename: &str, length: u64) -> Result<UploadUrl, SlackError>;
    /// Step 2: upload the bytes to the reserved URL.
    async fn upload_to_url(&self, url: &str, data: Vec<u8>) -> Result<(), SlackError>;
    /// Step 3: complete and share into the channel (and thread).
    async fn complete_upload(
        &self,
        file_id: &str,
        title: &str,
        channel: &str,
        thread_ts: Option<&str>,
    ) -> Result<String, SlackError>;
    /// Single-shot fallback for workspaces without streaming upload; returns
    /// the file plus its share map.
    async fn upload_file_legacy(
        &self,
        channel: &str,
        filename: &str,
        data: Vec<u8>,
        thread_ts: Option<&str>,
    ) -> Result<(File, FileShares), SlackError>;
    async fn download_file(&self, url: &str) -> Result<Vec<u8>, SlackError>;

    // -- emoji / typing -----------------------------------------------------

    async fn emoji_list(&self) -> Result<EmojiMap, SlackError>;
    /// Sent over the RTM socket; a no-op when no socket is attached.
    async fn send_typing(&self, channel: &str) -> Result<(), SlackError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_invalidation_classification() {
        assert!(SlackError::api("rtm.connect", "invalid_auth").is_auth_invalidated());
        assert!(SlackError::api("auth.test", "token_revoked").is_auth_invalidated());
        assert!(!SlackError::api("chat.postMessage", "ratelimited").is_auth_invalidated());
        assert!(!SlackError::Http("timeout".into()).is_auth_invalidated());
    }
}
