//! Edits: part survival, orphan redaction, and row bookkeeping.

mod common;

use common::{TEAM, harness, settle, wait_until};
use bridge::db;
use sb_slack::events::{MessageEvent, SlackEvent};
use sb_slack::types::{File, MessageItem};

fn file_message(channel: &str, user: &str, ts: &str, text: &str) -> SlackEvent {
    SlackEvent::Message(MessageEvent {
        channel: channel.to_owned(),
        user: Some(user.to_owned()),
        ts: ts.to_owned(),
        text: text.to_owned(),
        files: vec![File {
            id: "F123".to_owned(),
            name: "photo.png".to_owned(),
            mimetype: "image/png".to_owned(),
            url_private: "https://files.example/F123".to_owned(),
            ..File::default()
        }],
        ..MessageEvent::default()
    })
}

/// A message bridged as file + text parts, edited down to text only:
/// expect an edit for the text part, a redaction for the file part, the
/// file row deleted, and the text row untouched.
#[tokio::test]
async fn edit_removing_file_part_redacts_orphan() {
    let h = harness().await;
    let ts = "1700000001.000100";

    h.connector
        .queue_slack_event(&h.session, file_message("C456", "U2", ts, "look at this"))
        .await;
    wait_until("two parts bridged", || {
        db::message::get_parts(&h.db, TEAM, "C456", ts)
            .map(|p| p.len() == 2)
            .unwrap_or(false)
    })
    .await;

    let parts = db::message::get_parts(&h.db, TEAM, "C456", ts).unwrap();
    let file_part = parts.iter().find(|p| p.part_id == "file-0-F123").unwrap().clone();
    let text_part = parts.iter().find(|p| p.part_id.is_empty()).unwrap().clone();

    let edited = MessageItem {
        ts: ts.to_owned(),
        user: Some("U2".to_owned()),
        text: "only text now".to_owned(),
        ..MessageItem::default()
    };
    h.connector
        .queue_slack_event(
            &h.session,
            sb_test_utils::builders::edit("C456", edited, "1700000002.000000"),
        )
        .await;
    wait_until("file part redacted", || {
        h.hs
            .redactions
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.redacts == file_part.mxid)
    })
    .await;
    settle().await;

    // The text part was replaced via an m.replace relation.
    let edit_events: Vec<_> = h
        .hs
        .messages
        .lock()
        .unwrap()
        .iter()
        .filter(|m| {
            m.content
                .relates_to
                .as_ref()
                .and_then(|r| r.rel_type.as_deref())
                == Some("m.replace")
        })
        .cloned()
        .collect();
    assert_eq!(edit_events.len(), 1);
    let edit = &edit_events[0];
    assert_eq!(
        edit.content.relates_to.as_ref().unwrap().event_id.as_deref(),
        Some(text_part.mxid.as_str())
    );
    assert_eq!(
        edit.content.new_content.as_ref().unwrap().body,
        "only text now"
    );
    // Mention fan-out is suppressed on the outer edit content.
    assert!(edit.content.mentions.as_ref().unwrap().user_ids.is_empty());

    let remaining = db::message::get_parts(&h.db, TEAM, "C456", ts).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].part_id, "");
    assert_eq!(remaining[0].mxid, text_part.mxid);
}

/// An edit whose target was never bridged is dropped without output.
#[tokio::test]
async fn edit_of_unknown_target_is_dropped() {
    let h = harness().await;

    let edited = MessageItem {
        ts: "1690000000.000000".to_owned(),
        user: Some("U2".to_owned()),
        text: "ghost edit".to_owned(),
        ..MessageItem::default()
    };
    h.connector
        .queue_slack_event(
            &h.session,
            sb_test_utils::builders::edit("C456", edited, "1700000002.000000"),
        )
        .await;
    settle().await;
    settle().await;

    assert!(h.hs.messages.lock().unwrap().is_empty());
    assert!(h.hs.redactions.lock().unwrap().is_empty());
}

/// A Slack-side deletion redacts every part in stored order and removes
/// all rows.
#[tokio::test]
async fn delete_redacts_all_parts_in_order() {
    let h = harness().await;
    let ts = "1700000001.000100";

    h.connector
        .queue_slack_event(&h.session, file_message("C456", "U2", ts, "both parts"))
        .await;
    wait_until("two parts bridged", || {
        db::message::get_parts(&h.db, TEAM, "C456", ts)
            .map(|p| p.len() == 2)
            .unwrap_or(false)
    })
    .await;
    let parts = db::message::get_parts(&h.db, TEAM, "C456", ts).unwrap();

    h.connector
        .queue_slack_event(
            &h.session,
            sb_test_utils::builders::delete("C456", ts, "1700000003.000000"),
        )
        .await;
    wait_until("both parts redacted", || {
        h.hs.redactions.lock().unwrap().len() == 2
    })
    .await;

    let redacted: Vec<String> = h
        .hs
        .redactions
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.redacts.clone())
        .collect();
    // Redactions follow stored part order: file part first, then text.
    assert_eq!(redacted, vec![parts[0].mxid.clone(), parts[1].mxid.clone()]);
    assert!(db::message::get_parts(&h.db, TEAM, "C456", ts).unwrap().is_empty());
}
