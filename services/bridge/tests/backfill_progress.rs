//! Historical backfill progression and forward fill.

mod common;

use common::{TEAM, harness, harness_batch_send, wait_until};
use bridge::db;
use bridge::portal::PortalEvent;
use sb_ids::PortalKey;
use sb_test_utils::builders;

fn seed_channel_history(h: &common::Harness, count: usize) {
    let items: Vec<_> = (1..=count)
        .map(|i| builders::history_item("U2", &format!("1700000{:03}.000000", i), &format!("msg {}", i)))
        .collect();
    h.slack.seed_history("C456", items);
}

async fn create_portal_room(h: &common::Harness) -> String {
    let key = PortalKey::new(TEAM, "C456");
    let portal = h.connector.portal(&key).await;
    let info = h.slack.conversations.lock().unwrap().get("C456").cloned();
    portal.queue_event(PortalEvent::ChatResync {
        session: h.session.clone(),
        conversation: info,
        latest_message: None,
        create_portal: true,
    });
    wait_until("room created", || common::portal_room(h).is_some()).await;
    common::portal_room(h).unwrap()
}

/// 120 messages with a batch size of 50: three batches (50, 50, 20) with a
/// monotonically decreasing oldest-known timestamp, `has_more` false only
/// on the last.
#[tokio::test]
async fn historical_backfill_progresses_in_batches() {
    let h = harness().await;
    seed_channel_history(&h, 120);
    create_portal_room(&h).await;

    let key = PortalKey::new(TEAM, "C456");
    let portal = h.connector.portal(&key).await;

    let first = portal.backfill_batch(&h.session, 50).await.unwrap();
    assert_eq!(first.count, 50);
    assert!(first.has_more);
    let oldest_after_first = db::portal::get_portal(&h.db, &key)
        .unwrap()
        .unwrap()
        .oldest_message_ts
        .unwrap();
    assert_eq!(oldest_after_first, "1700000071.000000");

    let second = portal.backfill_batch(&h.session, 50).await.unwrap();
    assert_eq!(second.count, 50);
    assert!(second.has_more);
    let oldest_after_second = db::portal::get_portal(&h.db, &key)
        .unwrap()
        .unwrap()
        .oldest_message_ts
        .unwrap();
    assert_eq!(oldest_after_second, "1700000021.000000");
    assert!(oldest_after_second < oldest_after_first);

    let third = portal.backfill_batch(&h.session, 50).await.unwrap();
    assert_eq!(third.count, 20);
    assert!(!third.has_more);
    let row = db::portal::get_portal(&h.db, &key).unwrap().unwrap();
    assert_eq!(row.oldest_message_ts.as_deref(), Some("1700000001.000000"));
    assert!(!row.more_to_backfill);

    // Every message landed exactly once.
    let total: usize = (1..=120)
        .filter(|i| {
            db::message::get_first_part(&h.db, TEAM, "C456", &format!("1700000{:03}.000000", i))
                .unwrap()
                .is_some()
        })
        .count();
    assert_eq!(total, 120);
}

/// A finished portal yields empty batches instead of refetching.
#[tokio::test]
async fn finished_portal_backfills_nothing() {
    let h = harness().await;
    seed_channel_history(&h, 10);
    create_portal_room(&h).await;
    let key = PortalKey::new(TEAM, "C456");
    let portal = h.connector.portal(&key).await;

    let first = portal.backfill_batch(&h.session, 50).await.unwrap();
    assert_eq!(first.count, 10);
    assert!(!first.has_more);

    let again = portal.backfill_batch(&h.session, 50).await.unwrap();
    assert_eq!(again.count, 0);
    assert!(!again.has_more);
}

/// With batch send available, forward fill goes through one batched call
/// whose event IDs are the deterministic hashes, gated by the pre-backfill
/// dummy and the post-backfill marker.
#[tokio::test]
async fn forward_fill_uses_batch_send_with_deterministic_ids() {
    let h = harness_batch_send().await;
    seed_channel_history(&h, 5);
    let room = create_portal_room(&h).await;

    let key = PortalKey::new(TEAM, "C456");
    let portal = h.connector.portal(&key).await;
    let count = portal
        .forward_fill_locked(&h.session, &room, 50)
        .await
        .unwrap();
    assert_eq!(count, 5);

    let batches = h.hs.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    let (batch_room, events) = &batches[0];
    assert_eq!(batch_room, &room);
    // dummy + 5 messages + marker
    assert_eq!(events.len(), 7);
    assert_eq!(events[0].event_type, "fi.mau.dummy.pre_backfill");
    assert_eq!(events[6].event_type, "org.matrix.msc2716.marker");

    // Recomputing the deterministic ID from the composite inputs matches.
    for (i, event) in events[1..6].iter().enumerate() {
        let ts = format!("1700000{:03}.000000", i + 1);
        let expected = sb_matrix::event_id::deterministic_event_id(&room.clone(), TEAM, "C456", &ts, "");
        assert_eq!(event.event_id, expected);
        let row = db::message::get_first_part(&h.db, TEAM, "C456", &ts).unwrap().unwrap();
        assert_eq!(row.mxid, expected);
    }
}

/// Re-running forward fill after a partial flush adds nothing: the
/// deterministic IDs and the duplicate-row guard make it idempotent.
#[tokio::test]
async fn forward_fill_rerun_is_idempotent() {
    let h = harness_batch_send().await;
    seed_channel_history(&h, 5);
    let room = create_portal_room(&h).await;
    let key = PortalKey::new(TEAM, "C456");
    let portal = h.connector.portal(&key).await;

    let first = portal.forward_fill_locked(&h.session, &room, 50).await.unwrap();
    assert_eq!(first, 5);
    let second = portal.forward_fill_locked(&h.session, &room, 50).await.unwrap();
    assert_eq!(second, 0);

    for i in 1..=5 {
        let ts = format!("1700000{:03}.000000", i);
        assert_eq!(db::message::get_parts(&h.db, TEAM, "C456", &ts).unwrap().len(), 1);
    }
}
