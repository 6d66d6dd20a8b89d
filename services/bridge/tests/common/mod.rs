//! Shared harness: a connector wired to scripted Slack and recording
//! homeserver mocks over an in-memory store.
#![allow(dead_code)]

use bridge::config::load_config_from_str;
use bridge::connector::Connector;
use bridge::db::{self, Db, UserTeamRow};
use bridge::emoji::EmojiCache;
use bridge::portal::{BridgeContext, SessionHandle};
use bridge::puppets::Puppets;
use sb_slack::SlackClient;
use sb_test_utils::{MockHomeserver, MockSlack};
use std::sync::Arc;
use std::time::Duration;

pub const TEAM: &str = "T1";
pub const USER_MXID: &str = "@user:example.org";
pub const LOCAL_USER: &str = "U1";

pub struct Harness {
    pub db: Arc<Db>,
    pub slack: Arc<MockSlack>,
    pub hs: Arc<MockHomeserver>,
    pub connector: Arc<Connector>,
    pub session: SessionHandle,
}

pub async fn harness() -> Harness {
    harness_with_config(
        r#"
        [homeserver]
        domain = "example.org"
        [backfill]
        enable = true
        immediate_messages = 0
        [backfill.incremental]
        messages_per_batch = 50
        post_batch_delay = 0
        "#,
    )
    .await
}

pub async fn harness_with_config(config: &str) -> Harness {
    let h = harness_unstarted(config, false).await;
    start_session(&h).await;
    h
}

/// Harness with the batched historical-send capability enabled.
pub async fn harness_batch_send() -> Harness {
    let h = harness_unstarted(
        r#"
        [homeserver]
        domain = "example.org"
        [backfill]
        enable = true
        immediate_messages = 0
        [backfill.incremental]
        messages_per_batch = 50
        post_batch_delay = 0
        "#,
        true,
    )
    .await;
    start_session(&h).await;
    h
}

/// Start the stored login's session and wait for it to come up.
pub async fn start_session(h: &Harness) {
    let login = db::user_team::get_user_team(&h.db, TEAM, "u1", USER_MXID)
        .expect("login query")
        .expect("login row");
    h.connector.start_session(login).await;
    let mut connected = false;
    for _ in 0..200 {
        if h.connector.session_handle(TEAM, USER_MXID).await.is_some() {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(connected, "session never connected");
}

/// Build everything but do not start the session; used by tests that
/// script connect-time behavior (auth failure, boot lists).
pub async fn harness_unstarted(config: &str, batch_send: bool) -> Harness {
    let cfg = load_config_from_str(config).expect("harness config");
    let db = Arc::new(Db::open_in_memory().expect("in-memory store"));
    let slack = Arc::new(MockSlack::new(TEAM));
    let hs = Arc::new(MockHomeserver::with_capabilities(
        "example.org",
        batch_send,
        false,
    ));

    slack.add_user(LOCAL_USER, "Local User");
    slack.add_user("U2", "Remote User");
    slack.add_channel("C456", "general");

    let hs_dyn: Arc<dyn sb_matrix::Homeserver> = hs.clone();
    let emoji = Arc::new(EmojiCache::new(Arc::clone(&db), Arc::clone(&hs_dyn)));
    let puppets = Arc::new(Puppets::new(
        Arc::clone(&db),
        Arc::clone(&hs_dyn),
        cfg.bridge.clone(),
    ));
    let factory_client: Arc<dyn SlackClient> = Arc::clone(&slack) as Arc<dyn SlackClient>;
    let ctx = Arc::new(BridgeContext {
        db: Arc::clone(&db),
        homeserver: hs_dyn,
        emoji,
        puppets,
        config: cfg,
        client_factory: Box::new(move |_| {
            let client: Arc<dyn SlackClient> = Arc::clone(&factory_client);
            client
        }),
    });
    let connector = Connector::new(ctx);

    let login = UserTeamRow {
        team_id: TEAM.to_owned(),
        user_id: "u1".to_owned(),
        user_mxid: USER_MXID.to_owned(),
        token: Some("xoxc-test-token".to_owned()),
        cookie_token: Some("cookie".to_owned()),
        app_token: None,
        in_workspace: true,
    };
    db::user_team::insert_user_team(&db, &login).expect("login row");

    let session = SessionHandle {
        team_id: TEAM.to_owned(),
        user_id: LOCAL_USER.to_owned(),
        user_mxid: USER_MXID.to_owned(),
        client: Arc::clone(&slack) as Arc<dyn SlackClient>,
    };

    Harness {
        db,
        slack,
        hs,
        connector,
        session,
    }
}

/// First created room that is not the team space.
pub fn portal_room(h: &Harness) -> Option<String> {
    h.hs
        .created_rooms
        .lock()
        .unwrap()
        .iter()
        .find(|(_, args)| !args.is_space)
        .map(|(room, _)| room.clone())
}

/// Poll until `cond` holds; panics after two seconds.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

/// Let queued portal work drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
