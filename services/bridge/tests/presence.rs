//! Typing and read-receipt bridging.

mod common;

use common::{USER_MXID, harness, portal_room, settle, wait_until};
use sb_test_utils::builders;

/// A Slack typing event surfaces as ghost typing with the 5-second window.
#[tokio::test]
async fn typing_bridges_with_five_second_timeout() {
    let h = harness().await;
    h.connector
        .queue_slack_event(
            &h.session,
            builders::message("C456", "U2", "1700000001.000000", "seed"),
        )
        .await;
    wait_until("room created", || portal_room(&h).is_some()).await;

    h.connector
        .queue_slack_event(&h.session, builders::typing("C456", "U2"))
        .await;
    wait_until("typing sent", || !h.hs.typing.lock().unwrap().is_empty()).await;

    let (room, user, timeout_ms) = h.hs.typing.lock().unwrap()[0].clone();
    assert_eq!(room, portal_room(&h).unwrap());
    assert_eq!(user, "@slack_t1-u2:example.org");
    assert_eq!(timeout_ms, 5000);
}

/// channel_marked only bridges when the local user has a double puppet.
#[tokio::test]
async fn read_receipts_require_double_puppet() {
    let h = harness().await;
    let ts = "1700000001.000000";
    h.connector
        .queue_slack_event(&h.session, builders::message("C456", "U2", ts, "seed"))
        .await;
    wait_until("room created", || portal_room(&h).is_some()).await;
    // Delivery receipts from the bot may exist; remember the count.
    settle().await;
    let baseline = h.hs.read_receipts.lock().unwrap().len();

    // Without a double puppet: nothing.
    h.connector
        .queue_slack_event(
            &h.session,
            sb_slack::events::SlackEvent::ChannelMarked(sb_slack::events::ChannelMarkedEvent {
                channel: "C456".to_owned(),
                ts: ts.to_owned(),
            }),
        )
        .await;
    settle().await;
    assert_eq!(h.hs.read_receipts.lock().unwrap().len(), baseline);

    // With one: the last part is marked read by the intent.
    h.hs.set_double_puppet(USER_MXID, USER_MXID);
    h.connector
        .queue_slack_event(
            &h.session,
            sb_slack::events::SlackEvent::ChannelMarked(sb_slack::events::ChannelMarkedEvent {
                channel: "C456".to_owned(),
                ts: ts.to_owned(),
            }),
        )
        .await;
    wait_until("receipt sent", || {
        h.hs.read_receipts.lock().unwrap().len() > baseline
    })
    .await;
    let receipt = h.hs.read_receipts.lock().unwrap().last().cloned().unwrap();
    assert_eq!(receipt.1, USER_MXID);
}
