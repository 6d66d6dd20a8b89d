//! Logout: signout, token wipe, and last-local-user portal cleanup.

mod common;

use common::{TEAM, USER_MXID, harness_unstarted, wait_until};
use bridge::db;
use bridge::user_team::UserTeam;
use sb_ids::PortalKey;
use sb_test_utils::builders;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// With `kick_on_logout` enabled and no other local user on the team, the
/// portal is cleaned up (kick, then row deletion); message rows go with it.
#[tokio::test]
async fn logout_of_last_user_removes_portal() {
    let h = harness_unstarted(
        r#"
        [homeserver]
        domain = "example.org"
        [bridge]
        kick_on_logout = true
        [backfill]
        enable = true
        immediate_messages = 0
        "#,
        false,
    )
    .await;
    let login = db::user_team::get_user_team(&h.db, TEAM, "u1", USER_MXID)
        .unwrap()
        .unwrap();
    let session = UserTeam::new(
        Arc::clone(h.connector.ctx()),
        Arc::downgrade(&h.connector),
        login,
    );
    session.start().await;
    wait_until("team synced", || {
        db::team::get_team(&h.db, TEAM).unwrap().is_some()
    })
    .await;

    // Bridge one message so a portal with rows exists.
    let portal = h.connector.portal(&PortalKey::new(TEAM, "C456")).await;
    portal.queue_event(bridge::portal::PortalEvent::Slack {
        session: h.session.clone(),
        event: builders::message("C456", "U2", "1700000001.000000", "hello"),
    });
    wait_until("portal has a room", || {
        db::portal::get_portal(&h.db, &PortalKey::new(TEAM, "C456"))
            .unwrap()
            .and_then(|row| row.mxid)
            .is_some()
    })
    .await;

    session.logout().await.unwrap();

    // Signout attempted, tokens gone, login row gone.
    assert_eq!(h.slack.signouts.load(Ordering::Relaxed), 1);
    assert!(
        db::user_team::get_user_team(&h.db, TEAM, "u1", USER_MXID)
            .unwrap()
            .is_none()
    );
    // The user was kicked and the portal row (with its messages) deleted.
    assert!(!h.hs.kicks.lock().unwrap().is_empty());
    assert!(
        db::portal::get_portal(&h.db, &PortalKey::new(TEAM, "C456"))
            .unwrap()
            .is_none()
    );
    assert!(
        db::message::get_parts(&h.db, TEAM, "C456", "1700000001.000000")
            .unwrap()
            .is_empty()
    );
}

/// With `kick_on_logout` disabled the portal survives the logout.
#[tokio::test]
async fn logout_without_kick_keeps_portal() {
    let h = harness_unstarted(
        r#"
        [homeserver]
        domain = "example.org"
        [backfill]
        enable = true
        immediate_messages = 0
        "#,
        false,
    )
    .await;
    let login = db::user_team::get_user_team(&h.db, TEAM, "u1", USER_MXID)
        .unwrap()
        .unwrap();
    let session = UserTeam::new(
        Arc::clone(h.connector.ctx()),
        Arc::downgrade(&h.connector),
        login,
    );
    session.start().await;
    wait_until("team synced", || {
        db::team::get_team(&h.db, TEAM).unwrap().is_some()
    })
    .await;

    let portal = h.connector.portal(&PortalKey::new(TEAM, "C456")).await;
    portal.queue_event(bridge::portal::PortalEvent::Slack {
        session: h.session.clone(),
        event: builders::message("C456", "U2", "1700000001.000000", "hello"),
    });
    wait_until("portal has a room", || {
        db::portal::get_portal(&h.db, &PortalKey::new(TEAM, "C456"))
            .unwrap()
            .and_then(|row| row.mxid)
            .is_some()
    })
    .await;

    session.logout().await.unwrap();

    assert!(h.hs.kicks.lock().unwrap().is_empty());
    assert!(
        db::portal::get_portal(&h.db, &PortalKey::new(TEAM, "C456"))
            .unwrap()
            .is_some()
    );
}
