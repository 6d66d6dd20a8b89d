//! Scripted Slack client.
//!
//! Seed it with conversations, users, history, and emoji; it records every
//! write call for assertions and allocates monotonically increasing message
//! timestamps the way the live API does. `emit` pushes events into the
//! stream returned by `connect_stream`.

use async_trait::async_trait;
use sb_slack::blocks::Block;
use sb_slack::client::{
    HistoryRequest, PostMessageRequest, SlackClient, SlackError, UpdateMessageRequest,
};
use sb_slack::events::SlackEvent;
use sb_slack::types::{
    ClientBoot, Conversation, ConversationCounts, EmojiMap, File, FileShares, HistoryPage,
    MessageItem, PostMessageResponse, ShareEntry, TeamInfo, UploadUrl, UserInfo,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpload {
    pub filename: String,
    pub size: usize,
    pub channel: String,
    pub thread_ts: Option<String>,
    pub streamed: bool,
}

#[derive(Default)]
pub struct MockSlack {
    pub team: Mutex<TeamInfo>,
    pub users: Mutex<HashMap<String, UserInfo>>,
    pub conversations: Mutex<HashMap<String, Conversation>>,
    /// Per-channel history, ascending by timestamp.
    pub history: Mutex<HashMap<String, Vec<MessageItem>>>,
    pub emoji: Mutex<EmojiMap>,
    pub boot: Mutex<ClientBoot>,
    pub counts: Mutex<Vec<ConversationCounts>>,
    pub downloads: Mutex<HashMap<String, Vec<u8>>>,

    /// When set, every API call fails with this Slack error string.
    pub fail_with: Mutex<Option<String>>,
    /// Whether the three-step upload endpoint is available.
    pub streaming_uploads: Mutex<bool>,

    // Recorded writes.
    pub posted: Mutex<Vec<PostMessageRequest>>,
    pub updated: Mutex<Vec<UpdateMessageRequest>>,
    pub deleted: Mutex<Vec<(String, String)>>,
    pub reactions_added: Mutex<Vec<(String, String, String)>>,
    pub reactions_removed: Mutex<Vec<(String, String, String)>>,
    pub marked: Mutex<Vec<(String, String)>>,
    pub uploads: Mutex<Vec<RecordedUpload>>,
    pub typing_sent: Mutex<Vec<String>>,
    pub signouts: AtomicU64,
    pub history_calls: Mutex<Vec<HistoryRequest>>,

    ts_counter: AtomicU64,
    file_counter: AtomicU64,
    event_tx: Mutex<Option<mpsc::Sender<SlackEvent>>>,
}

impl MockSlack {
    pub fn new(team_id: &str) -> MockSlack {
        let mock = MockSlack {
            ts_counter: AtomicU64::new(1),
            streaming_uploads: Mutex::new(true),
            ..MockSlack::default()
        };
        *mock.team.lock().unwrap() = TeamInfo {
            id: team_id.to_owned(),
            name: "Test Workspace".to_owned(),
            domain: "test".to_owned(),
            ..TeamInfo::default()
        };
        mock
    }

    pub fn add_user(&self, id: &str, display_name: &str) {
        let mut user = UserInfo {
            id: id.to_owned(),
            name: display_name.to_lowercase(),
            ..UserInfo::default()
        };
        user.profile.display_name = display_name.to_owned();
        self.users.lock().unwrap().insert(id.to_owned(), user);
    }

    pub fn add_channel(&self, id: &str, name: &str) {
        self.conversations.lock().unwrap().insert(
            id.to_owned(),
            Conversation {
                id: id.to_owned(),
                name: name.to_owned(),
                is_channel: true,
                ..Conversation::default()
            },
        );
    }

    pub fn add_dm(&self, id: &str, peer: &str) {
        self.conversations.lock().unwrap().insert(
            id.to_owned(),
            Conversation {
                id: id.to_owned(),
                is_im: true,
                is_private: true,
                user: Some(peer.to_owned()),
                ..Conversation::default()
            },
        );
    }

    pub fn seed_history(&self, channel: &str, items: Vec<MessageItem>) {
        self.history
            .lock()
            .unwrap()
            .insert(channel.to_owned(), items);
    }

    /// Push an event into the connected stream.
    pub async fn emit(&self, event: SlackEvent) {
        let tx = self.event_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// Drop the stream, closing the session's event channel.
    pub fn close_stream(&self) {
        *self.event_tx.lock().unwrap() = None;
    }

    pub fn next_ts(&self) -> String {
        let n = self.ts_counter.fetch_add(1, Ordering::Relaxed);
        format!("17000000{:02}.{:06}", n / 1000, n % 1000)
    }

    fn check_fail(&self, method: &str) -> Result<(), SlackError> {
        match self.fail_with.lock().unwrap().as_ref() {
            Some(error) => Err(SlackError::api(method, error.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SlackClient for MockSlack {
    async fn connect_stream(&self) -> Result<mpsc::Receiver<SlackEvent>, SlackError> {
        self.check_fail("rtm.connect")?;
        let (tx, rx) = mpsc::channel(64);
        *self.event_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn team_info(&self) -> Result<TeamInfo, SlackError> {
        self.check_fail("team.info")?;
        Ok(self.team.lock().unwrap().clone())
    }

    async fn client_boot(&self) -> Result<ClientBoot, SlackError> {
        self.check_fail("client.userBoot")?;
        let boot = self.boot.lock().unwrap();
        Ok(ClientBoot {
            channels: boot.channels.clone(),
            ims: boot.ims.clone(),
        })
    }

    async fn client_counts(&self) -> Result<Vec<ConversationCounts>, SlackError> {
        self.check_fail("client.counts")?;
        Ok(self.counts.lock().unwrap().clone())
    }

    async fn auth_signout(&self) -> Result<(), SlackError> {
        self.signouts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn conversation_info(&self, channel: &str) -> Result<Conversation, SlackError> {
        self.check_fail("conversations.info")?;
        self.conversations
            .lock()
            .unwrap()
            .get(channel)
            .cloned()
            .ok_or_else(|| SlackError::api("conversations.info", "channel_not_found"))
    }

    async fn list_conversations(
        &self,
        _cursor: &str,
        limit: u32,
    ) -> Result<(Vec<Conversation>, String), SlackError> {
        self.check_fail("conversations.list")?;
        let mut all: Vec<Conversation> =
            self.conversations.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all.truncate(limit as usize);
        Ok((all, String::new()))
    }

    async fn conversation_members(
        &self,
        channel: &str,
        limit: u32,
    ) -> Result<Vec<String>, SlackError> {
        self.check_fail("conversations.members")?;
        let _ = channel;
        let mut members: Vec<String> = self.users.lock().unwrap().keys().cloned().collect();
        members.sort();
        members.truncate(limit as usize);
        Ok(members)
    }

    async fn open_conversation(&self, users: &[String]) -> Result<String, SlackError> {
        self.check_fail("conversations.open")?;
        Ok(format!("D{}", users.join("")))
    }

    async fn conversation_history(&self, req: &HistoryRequest) -> Result<HistoryPage, SlackError> {
        self.check_fail("conversations.history")?;
        self.history_calls.lock().unwrap().push(req.clone());
        let all = self
            .history
            .lock()
            .unwrap()
            .get(&req.channel)
            .cloned()
            .unwrap_or_default();
        // Window [oldest, latest), then newest-first with a limit.
        let mut window: Vec<MessageItem> = all
            .into_iter()
            .filter(|m| match &req.latest {
                Some(latest) => m.ts.as_str() < latest.as_str(),
                None => true,
            })
            .filter(|m| match &req.oldest {
                Some(oldest) => m.ts.as_str() > oldest.as_str(),
                None => true,
            })
            .collect();
        window.sort_by(|a, b| b.ts.cmp(&a.ts));
        let has_more = window.len() > req.limit as usize;
        window.truncate(req.limit as usize);
        Ok(HistoryPage {
            messages: window,
            has_more,
            ..HistoryPage::default()
        })
    }

    async fn mark_conversation(&self, channel: &str, ts: &str) -> Result<(), SlackError> {
        self.marked
            .lock()
            .unwrap()
            .push((channel.to_owned(), ts.to_owned()));
        Ok(())
    }

    async fn users_info(&self, user_ids: &[String]) -> Result<Vec<UserInfo>, SlackError> {
        self.check_fail("users.info")?;
        let users = self.users.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| users.get(id).cloned())
            .collect())
    }

    async fn bot_info(&self, bot_id: &str) -> Result<UserInfo, SlackError> {
        self.check_fail("bots.info")?;
        Ok(UserInfo {
            id: bot_id.to_owned(),
            name: "mock-bot".to_owned(),
            is_bot: true,
            ..UserInfo::default()
        })
    }

    async fn post_message(
        &self,
        req: &PostMessageRequest,
    ) -> Result<PostMessageResponse, SlackError> {
        self.check_fail("chat.postMessage")?;
        self.posted.lock().unwrap().push(req.clone());
        Ok(PostMessageResponse {
            ts: self.next_ts(),
            channel: req.channel.clone(),
        })
    }

    async fn update_message(
        &self,
        req: &UpdateMessageRequest,
    ) -> Result<PostMessageResponse, SlackError> {
        self.check_fail("chat.update")?;
        self.updated.lock().unwrap().push(req.clone());
        Ok(PostMessageResponse {
            ts: req.ts.clone(),
            channel: req.channel.clone(),
        })
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), SlackError> {
        self.check_fail("chat.delete")?;
        self.deleted
            .lock()
            .unwrap()
            .push((channel.to_owned(), ts.to_owned()));
        Ok(())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), SlackError> {
        self.check_fail("reactions.add")?;
        self.reactions_added.lock().unwrap().push((
            channel.to_owned(),
            ts.to_owned(),
            name.to_owned(),
        ));
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), SlackError> {
        self.check_fail("reactions.remove")?;
        self.reactions_removed.lock().unwrap().push((
            channel.to_owned(),
            ts.to_owned(),
            name.to_owned(),
        ));
        Ok(())
    }

    async fn get_upload_url(&self, filename: &str, _length: u64) -> Result<UploadUrl, SlackError> {
        self.check_fail("files.getUploadURLExternal")?;
        if !*self.streaming_uploads.lock().unwrap() {
            return Err(SlackError::api(
                "files.getUploadURLExternal",
                "method_deprecated",
            ));
        }
        let n = self.file_counter.fetch_add(1, Ordering::Relaxed);
        Ok(UploadUrl {
            upload_url: format!("https://mock.invalid/upload/{}/{}", n, filename),
            file_id: format!("F{:08}", n),
        })
    }

    async fn upload_to_url(&self, _url: &str, _data: Vec<u8>) -> Result<(), SlackError> {
        Ok(())
    }

    async fn complete_upload(
        &self,
        file_id: &str,
        title: &str,
        channel: &str,
        thread_ts: Option<&str>,
    ) -> Result<String, SlackError> {
        self.check_fail("files.completeUploadExternal")?;
        self.uploads.lock().unwrap().push(RecordedUpload {
            filename: title.to_owned(),
            size: 0,
            channel: channel.to_owned(),
            thread_ts: thread_ts.map(str::to_owned),
            streamed: true,
        });
        let _ = file_id;
        Ok(self.next_ts())
    }

    async fn upload_file_legacy(
        &self,
        channel: &str,
        filename: &str,
        data: Vec<u8>,
        thread_ts: Option<&str>,
    ) -> Result<(File, FileShares), SlackError> {
        self.check_fail("files.upload")?;
        self.uploads.lock().unwrap().push(RecordedUpload {
            filename: filename.to_owned(),
            size: data.len(),
            channel: channel.to_owned(),
            thread_ts: thread_ts.map(str::to_owned),
            streamed: false,
        });
        let n = self.file_counter.fetch_add(1, Ordering::Relaxed);
        let file = File {
            id: format!("F{:08}", n),
            name: filename.to_owned(),
            ..File::default()
        };
        let mut shares = FileShares::default();
        shares
            .private
            .insert(channel.to_owned(), vec![ShareEntry { ts: self.next_ts() }]);
        Ok((file, shares))
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>, SlackError> {
        self.check_fail("files.download")?;
        Ok(self
            .downloads
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| b"mock file bytes".to_vec()))
    }

    async fn emoji_list(&self) -> Result<EmojiMap, SlackError> {
        self.check_fail("emoji.list")?;
        Ok(self.emoji.lock().unwrap().clone())
    }

    async fn send_typing(&self, channel: &str) -> Result<(), SlackError> {
        self.typing_sent.lock().unwrap().push(channel.to_owned());
        Ok(())
    }
}

// Blocks are part of the recorded requests; re-export for assertions.
pub type RecordedBlocks = Vec<Block>;
