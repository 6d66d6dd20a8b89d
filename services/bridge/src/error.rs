//! Bridge-wide error taxonomy.
//!
//! Containment policy: per-event errors are logged and the event dropped
//! (with an in-room notice when configured); `AuthInvalidated` tears down
//! one session; store failures leave the event unacknowledged so a restart
//! reprocesses it from the stream.

use crate::convert::ConvertError;
use crate::db::StoreError;
use sb_matrix::MatrixError;
use sb_slack::SlackError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Tokens are no longer accepted; the session must stop, not retry.
    #[error("authentication invalidated")]
    AuthInvalidated,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("slack: {0}")]
    Slack(SlackError),
    #[error("homeserver: {0}")]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("media pipeline: {0}")]
    Media(String),
    /// Duplicate adds, deletes of unknown rows, unknown reaction targets.
    /// Logged and dropped, never surfaced to the room.
    #[error("duplicate or unknown target: {0}")]
    DuplicateOrUnknown(String),
}

impl From<SlackError> for BridgeError {
    fn from(e: SlackError) -> Self {
        if e.is_auth_invalidated() {
            BridgeError::AuthInvalidated
        } else {
            BridgeError::Slack(e)
        }
    }
}

impl BridgeError {
    /// Whether this error warrants a user-visible notice in the room.
    pub fn is_noticeable(&self) -> bool {
        matches!(
            self,
            BridgeError::Convert(_) | BridgeError::Media(_) | BridgeError::Slack(_)
        )
    }
}
