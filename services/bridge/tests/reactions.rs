//! Reactions: static-table resolution, custom emoji resync, duplicate
//! rejection, and redaction round-trips.

mod common;

use common::{TEAM, harness, settle, wait_until};
use bridge::db;
use sb_matrix::MessageContent;
use sb_test_utils::builders;

async fn seed_message(h: &common::Harness, ts: &str) {
    h.connector
        .queue_slack_event(&h.session, builders::message("C456", "U2", ts, "target"))
        .await;
    wait_until("target bridged", || {
        db::message::get_first_part(&h.db, TEAM, "C456", ts)
            .map(|p| p.is_some())
            .unwrap_or(false)
    })
    .await;
}

/// `smile` resolves through the static table to a Unicode key; the row is
/// keyed by (portal, ts, author, shortcode).
#[tokio::test]
async fn unicode_reaction_resolves_via_static_table() {
    let h = harness().await;
    let ts = "1700000001.000100";
    seed_message(&h, ts).await;

    h.connector
        .queue_slack_event(&h.session, builders::reaction_added("C456", "U2", ts, "smile"))
        .await;
    wait_until("reaction sent", || {
        !h.hs.reactions.lock().unwrap().is_empty()
    })
    .await;

    let sent = h.hs.reactions.lock().unwrap()[0].clone();
    assert_eq!(sent.content.relates_to.key.as_deref(), Some("😄"));
    assert_eq!(
        sent.content.slack_reaction.as_ref().unwrap().name,
        ":smile:"
    );
    assert_eq!(sent.content.shortcode.as_deref(), Some(":smile:"));

    let row = db::reaction::get_reaction(&h.db, TEAM, "C456", ts, "U2", "smile")
        .unwrap()
        .unwrap();
    assert_eq!(row.mxid, sent.event_id);
}

/// An unknown shortcode triggers a full team emoji sync; the resolved
/// custom emoji is reuploaded and the reaction key is its mxc URI.
#[tokio::test]
async fn custom_emoji_reaction_triggers_resync() {
    let h = harness().await;
    let ts = "1700000001.000100";
    seed_message(&h, ts).await;

    h.slack.emoji.lock().unwrap().insert(
        "party-parrot".to_owned(),
        "https://emoji.example/parrot.gif".to_owned(),
    );

    h.connector
        .queue_slack_event(
            &h.session,
            builders::reaction_added("C456", "U2", ts, "party-parrot"),
        )
        .await;
    wait_until("custom reaction sent", || {
        !h.hs.reactions.lock().unwrap().is_empty()
    })
    .await;

    let sent = h.hs.reactions.lock().unwrap()[0].clone();
    let key = sent.content.relates_to.key.clone().unwrap();
    assert!(key.starts_with("mxc://"), "key should be an mxc URI: {}", key);
    assert_eq!(sent.content.shortcode.as_deref(), Some(":party-parrot:"));
    assert_eq!(
        sent.content.slack_reaction.as_ref().unwrap().mxc.as_deref(),
        Some(key.as_str())
    );

    // The resync persisted the team set and the reupload cached the URI.
    let row = db::emoji::get_emoji(&h.db, TEAM, "party-parrot").unwrap().unwrap();
    assert_eq!(row.value, key);
}

/// Add followed by remove with the same key leaves no row and redacts the
/// original reaction event.
#[tokio::test]
async fn reaction_add_then_remove_leaves_no_row() {
    let h = harness().await;
    let ts = "1700000001.000100";
    seed_message(&h, ts).await;

    h.connector
        .queue_slack_event(&h.session, builders::reaction_added("C456", "U2", ts, "smile"))
        .await;
    wait_until("reaction sent", || {
        !h.hs.reactions.lock().unwrap().is_empty()
    })
    .await;
    let reaction_event = h.hs.reactions.lock().unwrap()[0].event_id.clone();

    h.connector
        .queue_slack_event(&h.session, builders::reaction_removed("C456", "U2", ts, "smile"))
        .await;
    wait_until("reaction redacted", || {
        h.hs
            .redactions
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.redacts == reaction_event)
    })
    .await;

    assert!(
        db::reaction::get_reaction(&h.db, TEAM, "C456", ts, "U2", "smile")
            .unwrap()
            .is_none()
    );
}

/// A duplicate add is a no-op: one reaction event, one row.
#[tokio::test]
async fn duplicate_reaction_add_is_a_noop() {
    let h = harness().await;
    let ts = "1700000001.000100";
    seed_message(&h, ts).await;

    for _ in 0..2 {
        h.connector
            .queue_slack_event(&h.session, builders::reaction_added("C456", "U2", ts, "smile"))
            .await;
    }
    wait_until("reaction sent", || {
        !h.hs.reactions.lock().unwrap().is_empty()
    })
    .await;
    settle().await;

    assert_eq!(h.hs.reactions.lock().unwrap().len(), 1);
}

/// Matrix-side redaction of a bridged message deletes it on Slack; of a
/// bridged reaction, removes the reaction; of anything else, nothing.
#[tokio::test]
async fn matrix_redaction_dispatches_by_target() {
    let h = harness().await;
    let ts = "1700000001.000100";
    seed_message(&h, ts).await;

    // Redact the bridged message.
    let msg_event = db::message::get_first_part(&h.db, TEAM, "C456", ts)
        .unwrap()
        .unwrap()
        .mxid;
    h.connector
        .on_matrix_redaction(
            &common::portal_room(&h).unwrap(),
            &common::USER_MXID.to_owned(),
            &msg_event,
        )
        .await
        .unwrap();
    wait_until("slack delete", || !h.slack.deleted.lock().unwrap().is_empty()).await;
    assert_eq!(
        h.slack.deleted.lock().unwrap()[0],
        ("C456".to_owned(), ts.to_owned())
    );
    assert!(db::message::get_parts(&h.db, TEAM, "C456", ts).unwrap().is_empty());

    // Redacting an unknown event is a silent no-op.
    h.connector
        .on_matrix_redaction(
            &common::portal_room(&h).unwrap(),
            &common::USER_MXID.to_owned(),
            &"$never-bridged".to_owned(),
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(h.slack.deleted.lock().unwrap().len(), 1);
}

/// A Matrix reaction with a Unicode key maps back to the shortcode for
/// reactions.add; unknown keys are rejected without an API call.
#[tokio::test]
async fn matrix_reaction_round_trips_shortcode() {
    let h = harness().await;
    let ts = "1700000001.000100";
    seed_message(&h, ts).await;
    let target = db::message::get_first_part(&h.db, TEAM, "C456", ts)
        .unwrap()
        .unwrap()
        .mxid;
    let room = common::portal_room(&h).unwrap();

    h.connector
        .on_matrix_reaction(&room, &common::USER_MXID.to_owned(), &"$r1".to_owned(), &target, "😄")
        .await
        .unwrap();
    wait_until("reaction added on slack", || {
        !h.slack.reactions_added.lock().unwrap().is_empty()
    })
    .await;
    assert_eq!(
        h.slack.reactions_added.lock().unwrap()[0],
        ("C456".to_owned(), ts.to_owned(), "smile".to_owned())
    );
    let row = db::reaction::get_reaction(&h.db, TEAM, "C456", ts, common::LOCAL_USER, "smile")
        .unwrap()
        .unwrap();
    assert_eq!(row.mxid, "$r1");
}
