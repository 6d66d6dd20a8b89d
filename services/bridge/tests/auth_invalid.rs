//! Credential invalidation at connect.

mod common;

use common::{TEAM, USER_MXID, harness_unstarted, wait_until};
use bridge::db;

/// Connect hits `invalid_auth`: tokens are cleared and persisted, the
/// session reports BadCredentials with the `slack-invalid-auth` code, and
/// no streaming connection is opened.
#[tokio::test]
async fn invalid_auth_clears_tokens_and_stops() {
    let h = harness_unstarted(
        r#"
        [homeserver]
        domain = "example.org"
        "#,
        false,
    )
    .await;
    *h.slack.fail_with.lock().unwrap() = Some("invalid_auth".to_owned());

    let login = db::user_team::get_user_team(&h.db, TEAM, "u1", USER_MXID)
        .unwrap()
        .unwrap();
    h.connector.start_session(login).await;

    wait_until("tokens cleared", || {
        db::user_team::get_user_team(&h.db, TEAM, "u1", USER_MXID)
            .unwrap()
            .is_some_and(|row| row.token.is_none() && row.cookie_token.is_none())
    })
    .await;

    // The stream was never opened (connect_stream would also fail, but the
    // failure came from team.info first) and nothing was bridged.
    assert!(h.hs.messages.lock().unwrap().is_empty());
}

/// A live stream error with an auth-invalidation code tears the session
/// down the same way. Paused time fast-forwards the reconnect back-off.
#[tokio::test(start_paused = true)]
async fn token_revoked_mid_session_clears_tokens() {
    let h = harness_unstarted(
        r#"
        [homeserver]
        domain = "example.org"
        "#,
        false,
    )
    .await;
    let login = db::user_team::get_user_team(&h.db, TEAM, "u1", USER_MXID)
        .unwrap()
        .unwrap();
    h.connector.start_session(login).await;
    wait_until("session up", || {
        db::team::get_team(&h.db, TEAM).unwrap().is_some()
    })
    .await;

    // Future reconnects fail with a revoked token; drop the stream so the
    // reader goes back through connect_stream.
    *h.slack.fail_with.lock().unwrap() = Some("token_revoked".to_owned());
    h.slack.close_stream();

    wait_until("tokens cleared", || {
        db::user_team::get_user_team(&h.db, TEAM, "u1", USER_MXID)
            .unwrap()
            .is_some_and(|row| row.token.is_none())
    })
    .await;
}
