//! Thread relations: root resolution, latest-marker advancement.

mod common;

use common::{TEAM, harness, wait_until};
use sb_test_utils::builders;

/// A reply with `thread_ts` pointing at a known root gets an `m.thread`
/// relation on the root with the reply fallback on the root (the latest at
/// that point); a second reply's fallback points at the first reply.
#[tokio::test]
async fn thread_replies_carry_root_and_latest() {
    let h = harness().await;

    h.connector
        .queue_slack_event(
            &h.session,
            builders::message("C456", "U2", "1700000001.000000", "root"),
        )
        .await;
    wait_until("root bridged", || {
        h.hs.messages.lock().unwrap().iter().any(|m| m.content.body == "root")
    })
    .await;
    let root_event = h
        .hs
        .messages
        .lock()
        .unwrap()
        .iter()
        .find(|m| m.content.body == "root")
        .unwrap()
        .event_id
        .clone();

    h.connector
        .queue_slack_event(
            &h.session,
            builders::thread_reply("C456", "U2", "1700000002.000000", "1700000001.000000", "reply one"),
        )
        .await;
    wait_until("first reply bridged", || {
        h.hs.messages.lock().unwrap().iter().any(|m| m.content.body == "reply one")
    })
    .await;

    let (first_reply_event, first_rel) = {
        let messages = h.hs.messages.lock().unwrap();
        let m = messages
            .iter()
            .find(|m| m.content.body == "reply one")
            .unwrap();
        (m.event_id.clone(), m.content.relates_to.clone().unwrap())
    };
    assert_eq!(first_rel.rel_type.as_deref(), Some("m.thread"));
    assert_eq!(first_rel.event_id.as_deref(), Some(root_event.as_str()));
    // No replies stored yet, so the fallback reply target is the root.
    assert_eq!(first_rel.in_reply_to.unwrap().event_id, root_event);
    assert!(first_rel.is_falling_back);

    h.connector
        .queue_slack_event(
            &h.session,
            builders::thread_reply("C456", "U2", "1700000003.000000", "1700000001.000000", "reply two"),
        )
        .await;
    wait_until("second reply bridged", || {
        h.hs.messages.lock().unwrap().iter().any(|m| m.content.body == "reply two")
    })
    .await;

    let second_rel = {
        let messages = h.hs.messages.lock().unwrap();
        messages
            .iter()
            .find(|m| m.content.body == "reply two")
            .unwrap()
            .content
            .relates_to
            .clone()
            .unwrap()
    };
    assert_eq!(second_rel.event_id.as_deref(), Some(root_event.as_str()));
    // The latest marker advanced to the first reply.
    assert_eq!(second_rel.in_reply_to.unwrap().event_id, first_reply_event);

    // Rows carry the thread root ts for relation queries.
    let reply_row = bridge::db::message::get_parts(&h.db, TEAM, "C456", "1700000003.000000")
        .unwrap()
        .remove(0);
    assert_eq!(reply_row.thread_root_ts, "1700000001.000000");
}

/// A reply whose root was never bridged goes through unthreaded rather
/// than being dropped.
#[tokio::test]
async fn unknown_thread_root_sends_unthreaded() {
    let h = harness().await;

    h.connector
        .queue_slack_event(
            &h.session,
            builders::thread_reply("C456", "U2", "1700000005.000000", "1600000000.000000", "stray"),
        )
        .await;
    wait_until("stray bridged", || {
        h.hs.messages.lock().unwrap().iter().any(|m| m.content.body == "stray")
    })
    .await;
    let rel = h
        .hs
        .messages
        .lock()
        .unwrap()
        .iter()
        .find(|m| m.content.body == "stray")
        .unwrap()
        .content
        .relates_to
        .clone();
    assert!(rel.is_none());
}
