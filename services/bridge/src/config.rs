//! Bridge configuration loading.
//!
//! TOML is the sole config source. Tokens are NOT configured here — logins
//! live in the database and are created by the provisioning flow.
//!
//! # Required fields
//! - `homeserver.domain`
//!
//! Everything else has a default, documented on the validated types.

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Validated config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub homeserver: HomeserverConfig,
    pub database: DatabaseConfig,
    pub bridge: PortalConfig,
    pub backfill: BackfillConfig,
}

#[derive(Debug, Clone)]
pub struct HomeserverConfig {
    /// Server name used in ghost MXIDs and room aliases.
    pub domain: String,
    /// Client-server API base URL.
    pub address: String,
    /// Appservice token for the client-server API.
    pub as_token: String,
    /// Bot localpart.
    pub bot_username: String,
    /// Whether the server offers the batched historical-send endpoint.
    pub batch_send: bool,
    /// Whether invites created with a room auto-join ghosts.
    pub auto_join_invites: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub sqlite_path: String,
}

/// Portal behavior knobs.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// `{userid}` placeholder; result becomes the ghost localpart.
    pub username_template: String,
    /// `{displayname}` placeholder for ghost display names.
    pub displayname_template: String,
    /// `{name}` placeholder for channel portals.
    pub channel_name_template: String,
    /// `{name}` placeholder for the team space.
    pub team_name_template: String,
    /// `always` / `never` / `default` (apply on encrypted rooms only).
    pub private_chat_portal_meta: PrivateChatMeta,
    /// Bounded per-portal queue size; producers drop (with a warning) when full.
    pub portal_message_buffer: usize,
    pub caption_in_message: bool,
    pub kick_on_logout: bool,
    pub federate_rooms: bool,
    /// Send an in-room notice when an event fails to convert.
    pub message_error_notices: bool,
    pub participant_sync_count: u32,
    pub participant_sync_only_on_create: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateChatMeta {
    Default,
    Always,
    Never,
}

impl PrivateChatMeta {
    fn parse(s: &str) -> Option<PrivateChatMeta> {
        match s {
            "default" => Some(PrivateChatMeta::Default),
            "always" => Some(PrivateChatMeta::Always),
            "never" => Some(PrivateChatMeta::Never),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub enable: bool,
    /// Total conversations to sync at connect; −1 means use the boot list.
    pub conversation_count: i64,
    /// First-pass message count right after room creation.
    pub immediate_messages: u32,
    /// Max missed-message forward fill at reconnect.
    pub missed_messages: u32,
    pub incremental: IncrementalBackfillConfig,
}

#[derive(Debug, Clone)]
pub struct IncrementalBackfillConfig {
    pub messages_per_batch: u32,
    /// Seconds between historical batches.
    pub post_batch_delay_secs: u64,
    /// Error cooldown before a task is retried, in seconds.
    pub error_cooldown_secs: u64,
    pub max_messages_channel: u32,
    pub max_messages_group_dm: u32,
    pub max_messages_dm: u32,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    homeserver: Option<RawHomeserver>,
    database: Option<RawDatabase>,
    bridge: Option<RawBridge>,
    backfill: Option<RawBackfill>,
}

#[derive(Debug, Deserialize)]
struct RawHomeserver {
    domain: Option<String>,
    address: Option<String>,
    as_token: Option<String>,
    bot_username: Option<String>,
    batch_send: Option<bool>,
    auto_join_invites: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawDatabase {
    sqlite_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBridge {
    username_template: Option<String>,
    displayname_template: Option<String>,
    channel_name_template: Option<String>,
    team_name_template: Option<String>,
    private_chat_portal_meta: Option<String>,
    portal_message_buffer: Option<usize>,
    caption_in_message: Option<bool>,
    kick_on_logout: Option<bool>,
    federate_rooms: Option<bool>,
    message_error_notices: Option<bool>,
    participant_sync_count: Option<u32>,
    participant_sync_only_on_create: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawBackfill {
    enable: Option<bool>,
    conversation_count: Option<i64>,
    immediate_messages: Option<u32>,
    missed_messages: Option<u32>,
    incremental: Option<RawIncremental>,
}

#[derive(Debug, Deserialize)]
struct RawIncremental {
    messages_per_batch: Option<u32>,
    post_batch_delay: Option<u64>,
    error_cooldown: Option<u64>,
    max_messages: Option<RawMaxMessages>,
}

#[derive(Debug, Deserialize)]
struct RawMaxMessages {
    channel: Option<u32>,
    group_dm: Option<u32>,
    dm: Option<u32>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<BridgeConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let raw_homeserver = raw
        .homeserver
        .ok_or_else(|| ConfigError::MissingField("homeserver".to_owned()))?;
    let domain = raw_homeserver
        .domain
        .ok_or_else(|| ConfigError::MissingField("homeserver.domain".to_owned()))?;
    let homeserver = HomeserverConfig {
        domain,
        address: raw_homeserver
            .address
            .unwrap_or_else(|| "http://localhost:8008".to_owned()),
        as_token: raw_homeserver.as_token.unwrap_or_default(),
        bot_username: raw_homeserver
            .bot_username
            .unwrap_or_else(|| "slackbot".to_owned()),
        batch_send: raw_homeserver.batch_send.unwrap_or(false),
        auto_join_invites: raw_homeserver.auto_join_invites.unwrap_or(false),
    };

    let database = DatabaseConfig {
        sqlite_path: raw
            .database
            .and_then(|d| d.sqlite_path)
            .unwrap_or_else(|| "/var/lib/slack-bridge/bridge.sqlite3".to_owned()),
    };

    let bridge = match raw.bridge {
        Some(b) => {
            let meta_str = b
                .private_chat_portal_meta
                .unwrap_or_else(|| "default".to_owned());
            let private_chat_portal_meta = PrivateChatMeta::parse(&meta_str).ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "bridge.private_chat_portal_meta must be default/always/never, got '{}'",
                    meta_str
                ))
            })?;
            PortalConfig {
                username_template: b
                    .username_template
                    .unwrap_or_else(|| "slack_{userid}".to_owned()),
                displayname_template: b
                    .displayname_template
                    .unwrap_or_else(|| "{displayname} (S)".to_owned()),
                channel_name_template: b
                    .channel_name_template
                    .unwrap_or_else(|| "#{name}".to_owned()),
                team_name_template: b.team_name_template.unwrap_or_else(|| "{name}".to_owned()),
                private_chat_portal_meta,
                portal_message_buffer: b.portal_message_buffer.unwrap_or(128),
                caption_in_message: b.caption_in_message.unwrap_or(false),
                kick_on_logout: b.kick_on_logout.unwrap_or(false),
                federate_rooms: b.federate_rooms.unwrap_or(true),
                message_error_notices: b.message_error_notices.unwrap_or(true),
                participant_sync_count: b.participant_sync_count.unwrap_or(50),
                participant_sync_only_on_create: b.participant_sync_only_on_create.unwrap_or(true),
            }
        }
        None => default_portal_config(),
    };

    let backfill = match raw.backfill {
        Some(b) => {
            let incremental = match b.incremental {
                Some(i) => {
                    let max = i.max_messages.unwrap_or(RawMaxMessages {
                        channel: None,
                        group_dm: None,
                        dm: None,
                    });
                    IncrementalBackfillConfig {
                        messages_per_batch: i.messages_per_batch.unwrap_or(50),
                        post_batch_delay_secs: i.post_batch_delay.unwrap_or(20),
                        error_cooldown_secs: i.error_cooldown.unwrap_or(3600),
                        max_messages_channel: max.channel.unwrap_or(10_000),
                        max_messages_group_dm: max.group_dm.unwrap_or(10_000),
                        max_messages_dm: max.dm.unwrap_or(10_000),
                    }
                }
                None => default_incremental_config(),
            };
            BackfillConfig {
                enable: b.enable.unwrap_or(false),
                conversation_count: b.conversation_count.unwrap_or(-1),
                immediate_messages: b.immediate_messages.unwrap_or(10),
                missed_messages: b.missed_messages.unwrap_or(50),
                incremental,
            }
        }
        None => BackfillConfig {
            enable: false,
            conversation_count: -1,
            immediate_messages: 10,
            missed_messages: 50,
            incremental: default_incremental_config(),
        },
    };

    Ok(BridgeConfig {
        homeserver,
        database,
        bridge,
        backfill,
    })
}

fn default_portal_config() -> PortalConfig {
    PortalConfig {
        username_template: "slack_{userid}".to_owned(),
        displayname_template: "{displayname} (S)".to_owned(),
        channel_name_template: "#{name}".to_owned(),
        team_name_template: "{name}".to_owned(),
        private_chat_portal_meta: PrivateChatMeta::Default,
        portal_message_buffer: 128,
        caption_in_message: false,
        kick_on_logout: false,
        federate_rooms: true,
        message_error_notices: true,
        participant_sync_count: 50,
        participant_sync_only_on_create: true,
    }
}

fn default_incremental_config() -> IncrementalBackfillConfig {
    IncrementalBackfillConfig {
        messages_per_batch: 50,
        post_batch_delay_secs: 20,
        error_cooldown_secs: 3600,
        max_messages_channel: 10_000,
        max_messages_group_dm: 10_000,
        max_messages_dm: 10_000,
    }
}

// ---------------------------------------------------------------------------
// Template substitution
// ---------------------------------------------------------------------------

/// Apply a `{placeholder}`-style template.
pub fn apply_template(template: &str, key: &str, value: &str) -> String {
    template.replace(&format!("{{{}}}", key), value)
}

impl PortalConfig {
    pub fn ghost_localpart(&self, team: &str, user: &str) -> String {
        apply_template(
            &self.username_template,
            "userid",
            &sb_ids::ghost_localpart(team, user),
        )
    }

    pub fn ghost_mxid(&self, team: &str, user: &str, domain: &str) -> String {
        format!("@{}:{}", self.ghost_localpart(team, user), domain)
    }

    pub fn ghost_displayname(&self, name: &str) -> String {
        apply_template(&self.displayname_template, "displayname", name)
    }

    pub fn channel_name(&self, name: &str) -> String {
        apply_template(&self.channel_name_template, "name", name)
    }

    pub fn team_name(&self, name: &str) -> String {
        apply_template(&self.team_name_template, "name", name)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = load_config_from_str("[homeserver]\ndomain = \"example.org\"\n").unwrap();
        assert_eq!(cfg.homeserver.domain, "example.org");
        assert_eq!(cfg.bridge.portal_message_buffer, 128);
        assert_eq!(cfg.backfill.conversation_count, -1);
        assert!(!cfg.backfill.enable);
        assert_eq!(cfg.backfill.incremental.messages_per_batch, 50);
    }

    #[test]
    fn missing_homeserver_domain_is_rejected() {
        let err = load_config_from_str("[bridge]\nkick_on_logout = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn invalid_private_chat_meta_is_rejected() {
        let err = load_config_from_str(
            "[homeserver]\ndomain = \"x\"\n[bridge]\nprivate_chat_portal_meta = \"sometimes\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn templates_apply() {
        let cfg = load_config_from_str("[homeserver]\ndomain = \"example.org\"\n").unwrap();
        assert_eq!(
            cfg.bridge.ghost_mxid("T1", "U2ABC", "example.org"),
            "@slack_t1-u2abc:example.org"
        );
        assert_eq!(cfg.bridge.ghost_displayname("Ada"), "Ada (S)");
        assert_eq!(cfg.bridge.channel_name("general"), "#general");
    }

    #[test]
    fn backfill_sections_parse() {
        let cfg = load_config_from_str(
            r#"
            [homeserver]
            domain = "example.org"
            [backfill]
            enable = true
            conversation_count = 20
            [backfill.incremental]
            messages_per_batch = 25
            post_batch_delay = 5
            [backfill.incremental.max_messages]
            channel = 500
            dm = 100
            "#,
        )
        .unwrap();
        assert!(cfg.backfill.enable);
        assert_eq!(cfg.backfill.conversation_count, 20);
        assert_eq!(cfg.backfill.incremental.messages_per_batch, 25);
        assert_eq!(cfg.backfill.incremental.post_batch_delay_secs, 5);
        assert_eq!(cfg.backfill.incremental.max_messages_channel, 500);
        assert_eq!(cfg.backfill.incremental.max_messages_dm, 100);
        assert_eq!(cfg.backfill.incremental.max_messages_group_dm, 10_000);
    }
}
