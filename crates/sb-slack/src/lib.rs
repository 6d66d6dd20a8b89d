// sb-slack: Slack-side protocol types and client surface.
//
// The event sum type uses the top-level `type` field for discriminated
// deserialization; unrecognized kinds land in `SlackEvent::Unknown` so a new
// Slack event never kills the stream reader.

pub mod blocks;
pub mod client;
pub mod events;
pub mod http;
pub mod rtm;
pub mod types;

pub use client::{SlackClient, SlackError};
pub use events::SlackEvent;
