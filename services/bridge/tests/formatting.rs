//! Rich-text conversion through the live paths: Matrix HTML → Slack block
//! tree, and Slack blocks → Matrix HTML.

mod common;

use common::{harness, portal_room, wait_until};
use sb_matrix::MessageContent;
use sb_slack::blocks::{Block, RichTextElement, RichTextSection};
use sb_slack::events::{MessageEvent, SlackEvent};
use sb_test_utils::builders;

async fn bridged_room(h: &common::Harness) -> String {
    h.connector
        .queue_slack_event(
            &h.session,
            builders::message("C456", "U2", "1700000001.000000", "seed"),
        )
        .await;
    wait_until("room created", || portal_room(h).is_some()).await;
    portal_room(h).unwrap()
}

/// HTML body with inline styles becomes a rich-text block with styled runs.
#[tokio::test]
async fn matrix_html_becomes_styled_rich_text() {
    let h = harness().await;
    let room = bridged_room(&h).await;

    let content = MessageContent::html(
        "bold and struck",
        "<p><strong>bold</strong> and <del>struck</del></p>",
    );
    h.connector
        .on_matrix_message(&room, &common::USER_MXID.to_owned(), &"$fmt1".to_owned(), content)
        .await
        .unwrap();
    wait_until("posted", || !h.slack.posted.lock().unwrap().is_empty()).await;

    let posted = h.slack.posted.lock().unwrap()[0].clone();
    let Block::RichText(rt) = &posted.blocks[0] else {
        panic!("expected rich_text block");
    };
    let RichTextSection::RichTextSection(section) = &rt.elements[0] else {
        panic!("expected section");
    };
    let styled: Vec<(&str, bool, bool)> = section
        .elements
        .iter()
        .filter_map(|e| match e {
            RichTextElement::Text { text, style } => Some((
                text.as_str(),
                style.is_some_and(|s| s.bold),
                style.is_some_and(|s| s.strike),
            )),
            _ => None,
        })
        .collect();
    assert!(styled.contains(&("bold", true, false)));
    assert!(styled.contains(&("struck", false, true)));
}

/// Bare domains in plain text are linkified with `http://` prepended.
#[tokio::test]
async fn bare_domain_is_linkified() {
    let h = harness().await;
    let room = bridged_room(&h).await;

    let content = MessageContent::html("see example.com", "<p>see example.com</p>");
    h.connector
        .on_matrix_message(&room, &common::USER_MXID.to_owned(), &"$fmt2".to_owned(), content)
        .await
        .unwrap();
    wait_until("posted", || !h.slack.posted.lock().unwrap().is_empty()).await;

    let posted = h.slack.posted.lock().unwrap()[0].clone();
    let Block::RichText(rt) = &posted.blocks[0] else {
        panic!("expected rich_text block");
    };
    let RichTextSection::RichTextSection(section) = &rt.elements[0] else {
        panic!("expected section");
    };
    assert!(section.elements.iter().any(|e| matches!(
        e,
        RichTextElement::Link { url, .. } if url == "http://example.com"
    )));
}

/// `<ol start>` is 1-based while the wire offset is 0-based; a nested list
/// splits its parent into sibling runs with increasing indent, and the
/// continuation carries the advanced offset.
#[tokio::test]
async fn nested_matrix_list_becomes_indented_runs() {
    let h = harness().await;
    let room = bridged_room(&h).await;

    let content = MessageContent::html(
        "3. three 4. four - sub 5. five",
        "<ol start=\"3\"><li>three</li><li>four<ul><li>sub</li></ul></li><li>five</li></ol>",
    );
    h.connector
        .on_matrix_message(&room, &common::USER_MXID.to_owned(), &"$fmt3".to_owned(), content)
        .await
        .unwrap();
    wait_until("posted", || !h.slack.posted.lock().unwrap().is_empty()).await;

    let posted = h.slack.posted.lock().unwrap()[0].clone();
    let Block::RichText(rt) = &posted.blocks[0] else {
        panic!("expected rich_text block");
    };
    let lists: Vec<_> = rt
        .elements
        .iter()
        .filter_map(|s| match s {
            RichTextSection::RichTextList(list) => Some(list),
            _ => None,
        })
        .collect();
    assert_eq!(lists.len(), 3);

    assert_eq!(lists[0].style, "ordered");
    assert_eq!(lists[0].indent, 0);
    assert_eq!(lists[0].offset, 2);
    assert_eq!(lists[0].elements.len(), 2);

    assert_eq!(lists[1].style, "bullet");
    assert_eq!(lists[1].indent, 1);
    assert_eq!(lists[1].elements.len(), 1);

    assert_eq!(lists[2].style, "ordered");
    assert_eq!(lists[2].indent, 0);
    assert_eq!(lists[2].offset, 4);
    assert_eq!(lists[2].elements.len(), 1);
}

/// Sibling Slack lists with increasing indent nest inside the last item of
/// the shallower list; a continuation at the original indent becomes its
/// own list.
#[tokio::test]
async fn indented_slack_lists_render_nested() {
    let h = harness().await;

    let blocks_json = serde_json::json!([{
        "type": "rich_text",
        "elements": [
            {
                "type": "rich_text_list",
                "style": "bullet",
                "elements": [
                    {"type": "rich_text_section", "elements": [{"type": "text", "text": "a"}]},
                    {"type": "rich_text_section", "elements": [{"type": "text", "text": "b"}]}
                ]
            },
            {
                "type": "rich_text_list",
                "style": "bullet",
                "indent": 1,
                "elements": [
                    {"type": "rich_text_section", "elements": [{"type": "text", "text": "b1"}]}
                ]
            },
            {
                "type": "rich_text_list",
                "style": "bullet",
                "elements": [
                    {"type": "rich_text_section", "elements": [{"type": "text", "text": "c"}]}
                ]
            }
        ]
    }]);
    let event = SlackEvent::Message(MessageEvent {
        channel: "C456".to_owned(),
        user: Some("U2".to_owned()),
        ts: "1700000011.000000".to_owned(),
        text: "fallback".to_owned(),
        blocks: serde_json::from_value(blocks_json).unwrap(),
        ..MessageEvent::default()
    });
    h.connector.queue_slack_event(&h.session, event).await;
    wait_until("nested list bridged", || {
        h.hs
            .messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.content.formatted_body.as_deref().is_some_and(|f| f.contains("b1")))
    })
    .await;

    let sent = h
        .hs
        .messages
        .lock()
        .unwrap()
        .iter()
        .find(|m| m.content.formatted_body.as_deref().is_some_and(|f| f.contains("b1")))
        .cloned()
        .unwrap();
    let html = sent.content.formatted_body.unwrap();
    assert!(html.contains("<li>b<ul><li>b1</li></ul></li>"), "html: {}", html);
    assert!(html.contains("</ul><ul><li>c</li></ul>"), "html: {}", html);
}

/// Slack rich text with styles, a mention, and a list renders as HTML with
/// a mention pill and list markup; mention fan-out is recorded.
#[tokio::test]
async fn slack_rich_text_renders_html() {
    let h = harness().await;

    let blocks_json = serde_json::json!([{
        "type": "rich_text",
        "elements": [
            {
                "type": "rich_text_section",
                "elements": [
                    {"type": "text", "text": "ping ", "style": {"italic": true}},
                    {"type": "user", "user_id": "U2"}
                ]
            },
            {
                "type": "rich_text_list",
                "style": "ordered",
                "elements": [
                    {"type": "rich_text_section", "elements": [{"type": "text", "text": "one"}]},
                    {"type": "rich_text_section", "elements": [{"type": "text", "text": "two"}]}
                ]
            }
        ]
    }]);
    let event = SlackEvent::Message(MessageEvent {
        channel: "C456".to_owned(),
        user: Some("U2".to_owned()),
        ts: "1700000009.000000".to_owned(),
        text: "fallback".to_owned(),
        blocks: serde_json::from_value(blocks_json).unwrap(),
        ..MessageEvent::default()
    });
    h.connector.queue_slack_event(&h.session, event).await;
    wait_until("rich text bridged", || {
        h.hs
            .messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.content.formatted_body.as_deref().is_some_and(|f| f.contains("<ol>")))
    })
    .await;

    let sent = h
        .hs
        .messages
        .lock()
        .unwrap()
        .iter()
        .find(|m| m.content.formatted_body.as_deref().is_some_and(|f| f.contains("<ol>")))
        .cloned()
        .unwrap();
    let html = sent.content.formatted_body.unwrap();
    assert!(html.contains("<em>ping </em>"));
    assert!(html.contains("https://matrix.to/#/@slack_t1-u2:example.org"));
    assert!(html.contains("<li>one</li><li>two</li>"));
    let mentions = sent.content.mentions.unwrap();
    assert_eq!(mentions.user_ids, vec!["@slack_t1-u2:example.org".to_owned()]);
}

/// Unknown blocks collapse into a single italic notice.
#[tokio::test]
async fn consecutive_unknown_blocks_collapse() {
    let h = harness().await;

    let blocks_json = serde_json::json!([
        {"type": "actions", "elements": []},
        {"type": "input", "label": {"type": "plain_text", "text": "x"}},
        {"type": "section", "text": {"type": "plain_text", "text": "real content"}}
    ]);
    let event = SlackEvent::Message(MessageEvent {
        channel: "C456".to_owned(),
        user: Some("U2".to_owned()),
        ts: "1700000010.000000".to_owned(),
        text: "fallback".to_owned(),
        blocks: serde_json::from_value(blocks_json).unwrap(),
        ..MessageEvent::default()
    });
    h.connector.queue_slack_event(&h.session, event).await;
    wait_until("bridged", || {
        h.hs
            .messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.content.body.contains("real content"))
    })
    .await;

    let sent = h
        .hs
        .messages
        .lock()
        .unwrap()
        .iter()
        .find(|m| m.content.body.contains("real content"))
        .cloned()
        .unwrap();
    let html = sent.content.formatted_body.unwrap();
    assert_eq!(html.matches("<i>Unsupported block</i>").count(), 1);
    assert!(html.contains("<p>real content</p>"));
}
