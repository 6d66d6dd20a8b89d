//! Builders for common stream events and message shapes.

use sb_slack::events::{
    MessageEvent, ReactionEvent, ReactionItem, SlackEvent, TypingEvent,
};
use sb_slack::types::{File, MessageItem};

pub fn message(channel: &str, user: &str, ts: &str, text: &str) -> SlackEvent {
    SlackEvent::Message(MessageEvent {
        channel: channel.to_owned(),
        user: Some(user.to_owned()),
        ts: ts.to_owned(),
        text: text.to_owned(),
        ..MessageEvent::default()
    })
}

pub fn thread_reply(channel: &str, user: &str, ts: &str, thread_ts: &str, text: &str) -> SlackEvent {
    SlackEvent::Message(MessageEvent {
        channel: channel.to_owned(),
        user: Some(user.to_owned()),
        ts: ts.to_owned(),
        thread_ts: Some(thread_ts.to_owned()),
        text: text.to_owned(),
        ..MessageEvent::default()
    })
}

pub fn edit(channel: &str, target: MessageItem, event_ts: &str) -> SlackEvent {
    SlackEvent::Message(MessageEvent {
        channel: channel.to_owned(),
        subtype: Some("message_changed".to_owned()),
        ts: event_ts.to_owned(),
        message: Some(Box::new(target)),
        ..MessageEvent::default()
    })
}

pub fn delete(channel: &str, deleted_ts: &str, event_ts: &str) -> SlackEvent {
    SlackEvent::Message(MessageEvent {
        channel: channel.to_owned(),
        subtype: Some("message_deleted".to_owned()),
        ts: event_ts.to_owned(),
        deleted_ts: Some(deleted_ts.to_owned()),
        ..MessageEvent::default()
    })
}

pub fn reaction_added(channel: &str, user: &str, target_ts: &str, name: &str) -> SlackEvent {
    SlackEvent::ReactionAdded(reaction(channel, user, target_ts, name))
}

pub fn reaction_removed(channel: &str, user: &str, target_ts: &str, name: &str) -> SlackEvent {
    SlackEvent::ReactionRemoved(reaction(channel, user, target_ts, name))
}

fn reaction(channel: &str, user: &str, target_ts: &str, name: &str) -> ReactionEvent {
    ReactionEvent {
        user: user.to_owned(),
        reaction: name.to_owned(),
        item: ReactionItem {
            channel: channel.to_owned(),
            ts: target_ts.to_owned(),
        },
        event_ts: format!("{}1", target_ts),
    }
}

pub fn typing(channel: &str, user: &str) -> SlackEvent {
    SlackEvent::UserTyping(TypingEvent {
        channel: channel.to_owned(),
        user: user.to_owned(),
    })
}

pub fn history_item(user: &str, ts: &str, text: &str) -> MessageItem {
    MessageItem {
        ts: ts.to_owned(),
        user: Some(user.to_owned()),
        text: text.to_owned(),
        ..MessageItem::default()
    }
}

pub fn history_item_with_file(user: &str, ts: &str, text: &str, file_id: &str) -> MessageItem {
    MessageItem {
        ts: ts.to_owned(),
        user: Some(user.to_owned()),
        text: text.to_owned(),
        files: vec![File {
            id: file_id.to_owned(),
            name: format!("{}.png", file_id),
            mimetype: "image/png".to_owned(),
            url_private: format!("https://files.example/{}", file_id),
            ..File::default()
        }],
        ..MessageItem::default()
    }
}
