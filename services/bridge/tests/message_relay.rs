//! Plain-text relay in both directions, duplicate suppression, and
//! per-portal ordering.

mod common;

use common::{LOCAL_USER, TEAM, USER_MXID, harness, portal_room, settle, wait_until};
use bridge::db;
use sb_matrix::MessageContent;
use sb_test_utils::builders;

/// Local user sends "hello" into a bridged room; expect one
/// chat.postMessage and one row keyed by the returned timestamp.
#[tokio::test]
async fn matrix_text_message_reaches_slack() {
    let h = harness().await;

    // Bridge the channel first so the room mapping exists.
    h.connector
        .queue_slack_event(&h.session, builders::message("C456", "U2", "1700000001.000100", "hi"))
        .await;
    wait_until("room created", || portal_room(&h).is_some()).await;
    let room = portal_room(&h).unwrap();

    h.connector
        .on_matrix_message(&room, &USER_MXID.to_owned(), &"$local1".to_owned(), MessageContent::text("hello"))
        .await
        .unwrap();
    wait_until("message posted", || {
        !h.slack.posted.lock().unwrap().is_empty()
    })
    .await;

    let posted = h.slack.posted.lock().unwrap()[0].clone();
    assert_eq!(posted.channel, "C456");
    assert_eq!(posted.text, "hello");
    assert!(posted.thread_ts.is_none());

    settle().await;
    let row = db::message::get_by_mxid(&h.db, "$local1").unwrap().unwrap();
    assert_eq!(row.team_id, TEAM);
    assert_eq!(row.channel_id, "C456");
    assert_eq!(row.author_id, LOCAL_USER);
    // The row's ts is exactly what Slack returned for the post.
    let parts = db::message::get_parts(&h.db, TEAM, "C456", &row.message_ts).unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].part_id, "");
}

/// A Slack message creates the room lazily and lands as one event with the
/// origin timestamp; its row preserves the Slack ts byte-for-byte.
#[tokio::test]
async fn slack_text_message_reaches_matrix() {
    let h = harness().await;

    h.connector
        .queue_slack_event(
            &h.session,
            builders::message("C456", "U2", "1700000001.000100", "from slack"),
        )
        .await;
    wait_until("message bridged", || {
        !h.hs.messages.lock().unwrap().is_empty()
    })
    .await;

    let sent = h.hs.messages.lock().unwrap()[0].clone();
    assert_eq!(sent.content.body, "from slack");
    assert_eq!(sent.sender, "@slack_t1-u2:example.org");
    assert!(sent.ts.is_some());

    let parts = db::message::get_parts(&h.db, TEAM, "C456", "1700000001.000100").unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].message_ts, "1700000001.000100");
    assert_eq!(parts[0].mxid, sent.event_id);
}

/// Duplicate streaming delivery of the same ts yields no extra rows and no
/// extra homeserver events.
#[tokio::test]
async fn duplicate_delivery_is_a_noop() {
    let h = harness().await;

    for _ in 0..2 {
        h.connector
            .queue_slack_event(
                &h.session,
                builders::message("C456", "U2", "1700000001.000100", "once"),
            )
            .await;
    }
    wait_until("first copy bridged", || {
        !h.hs.messages.lock().unwrap().is_empty()
    })
    .await;
    settle().await;

    let message_events: Vec<_> = h
        .hs
        .messages
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m.content.body == "once")
        .cloned()
        .collect();
    assert_eq!(message_events.len(), 1);
    let parts = db::message::get_parts(&h.db, TEAM, "C456", "1700000001.000100").unwrap();
    assert_eq!(parts.len(), 1);
}

/// Two messages in the same channel arrive on the homeserver in ts order.
#[tokio::test]
async fn per_portal_ordering_is_preserved() {
    let h = harness().await;

    h.connector
        .queue_slack_event(
            &h.session,
            builders::message("C456", "U2", "1700000001.000100", "first"),
        )
        .await;
    h.connector
        .queue_slack_event(
            &h.session,
            builders::message("C456", "U2", "1700000002.000100", "second"),
        )
        .await;
    wait_until("both bridged", || {
        h.hs
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.content.body == "first" || m.content.body == "second")
            .count()
            == 2
    })
    .await;

    let bodies: Vec<String> = h
        .hs
        .messages
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m.content.body == "first" || m.content.body == "second")
        .map(|m| m.content.body.clone())
        .collect();
    assert_eq!(bodies, vec!["first".to_owned(), "second".to_owned()]);
}

/// A message whose author cannot be resolved is dropped without a row.
#[tokio::test]
async fn authorless_message_is_dropped() {
    let h = harness().await;

    let mut event = builders::message("C456", "U2", "1700000001.000100", "ok");
    if let sb_slack::events::SlackEvent::Message(msg) = &mut event {
        msg.user = None;
    }
    h.connector.queue_slack_event(&h.session, event).await;
    settle().await;
    settle().await;

    assert!(h.hs.messages.lock().unwrap().is_empty());
    assert!(
        db::message::get_parts(&h.db, TEAM, "C456", "1700000001.000100")
            .unwrap()
            .is_empty()
    );
}
