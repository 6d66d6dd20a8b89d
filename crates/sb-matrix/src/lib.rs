// sb-matrix: homeserver-side types and the collaborator contract.
//
// The bridge core consumes the homeserver through the `Homeserver` trait;
// the actual client library (and encryption) live behind it. Content structs
// here carry the frozen field names of the events the bridge emits.

pub mod appservice;
pub mod client;
pub mod content;
pub mod event_id;

pub use client::{Homeserver, MatrixError, RoomCreateArgs};
pub use content::{MessageContent, ReactionContent, RelatesTo};

/// Matrix room ID (`!abc:domain`).
pub type RoomId = String;
/// Matrix event ID (`$hash:domain`).
pub type EventId = String;
/// Matrix user ID (`@local:domain`).
pub type Mxid = String;
/// Matrix content URI (`mxc://domain/media`).
pub type ContentUri = String;
