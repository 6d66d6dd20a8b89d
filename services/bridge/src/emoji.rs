//! Emoji resolution and the per-team resync.
//!
//! Resolution order for a shortcode: the static Unicode table, then the
//! team's custom emoji in the store (following `alias:` redirects), then a
//! full-team resync and one more lookup. Resyncs are single-flight per team
//! and rate-limited via the `emoji_synced_at` column on the team row.
//!
//! Custom emoji images are reuploaded to the homeserver lazily, on first
//! resolution, and the resulting mxc URI is cached in the row.

use crate::db::{self, Db, EmojiRow};
use crate::error::BridgeError;
use chrono::{DateTime, Duration, Utc};
use sb_matrix::{ContentUri, Homeserver};
use sb_slack::SlackClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Minimum gap between full emoji resyncs for one team.
const MIN_RESYNC_INTERVAL_MINS: i64 = 30;

/// Alias chains longer than this are treated as unresolvable.
const MAX_ALIAS_DEPTH: u8 = 5;

// ---------------------------------------------------------------------------
// Resolution result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEmoji {
    /// A plain Unicode glyph, used directly as the reaction key.
    Unicode(String),
    /// A custom team emoji reuploaded to the homeserver.
    Custom {
        mxc: ContentUri,
        shortcode: String,
    },
}

// ---------------------------------------------------------------------------
// EmojiCache
// ---------------------------------------------------------------------------

pub struct EmojiCache {
    db: Arc<Db>,
    homeserver: Arc<dyn Homeserver>,
    /// Per-team resync guards: holding a team's mutex means a resync for
    /// that team is in flight.
    resync_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EmojiCache {
    pub fn new(db: Arc<Db>, homeserver: Arc<dyn Homeserver>) -> EmojiCache {
        EmojiCache {
            db,
            homeserver,
            resync_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a shortcode (without colons, skin-tone suffix tolerated).
    ///
    /// `None` means the shortcode is unknown even after a resync; the caller
    /// rejects the reaction.
    pub async fn resolve(
        &self,
        client: &dyn SlackClient,
        team_id: &str,
        shortcode: &str,
    ) -> Result<Option<ResolvedEmoji>, BridgeError> {
        let base = shortcode.split("::").next().unwrap_or(shortcode);

        if let Some(resolved) = self.resolve_cached(client, team_id, base, 0).await? {
            return Ok(Some(resolved));
        }

        // Miss: fetch the team's full list and retry once. The minimum
        // interval only gates periodic resyncs, not misses.
        self.resync(client, team_id, true).await?;
        self.resolve_cached(client, team_id, base, 0).await
    }

    /// Lookup without triggering a resync.
    async fn resolve_cached(
        &self,
        client: &dyn SlackClient,
        team_id: &str,
        shortcode: &str,
        depth: u8,
    ) -> Result<Option<ResolvedEmoji>, BridgeError> {
        if depth > MAX_ALIAS_DEPTH {
            warn!(team_id, shortcode, "emoji alias chain too deep");
            return Ok(None);
        }
        if let Some(glyph) = emojis::get_by_shortcode(shortcode) {
            return Ok(Some(ResolvedEmoji::Unicode(glyph.as_str().to_owned())));
        }
        let Some(row) = db::emoji::get_emoji(&self.db, team_id, shortcode)? else {
            return Ok(None);
        };
        if let Some(alias) = row.value.strip_prefix("alias:") {
            let alias = alias.to_owned();
            return Box::pin(self.resolve_cached(client, team_id, &alias, depth + 1)).await;
        }
        if row.value.starts_with("mxc://") {
            return Ok(Some(ResolvedEmoji::Custom {
                mxc: row.value,
                shortcode: shortcode.to_owned(),
            }));
        }
        if !row.value.is_empty() {
            // Pre-resolved Unicode value stored by the sync.
            return Ok(Some(ResolvedEmoji::Unicode(row.value)));
        }
        if row.image_url.is_empty() {
            return Ok(None);
        }
        // Lazy reupload of the custom image.
        let mxc = self.reupload(client, &row).await?;
        Ok(Some(ResolvedEmoji::Custom {
            mxc,
            shortcode: shortcode.to_owned(),
        }))
    }

    async fn reupload(
        &self,
        client: &dyn SlackClient,
        row: &EmojiRow,
    ) -> Result<ContentUri, BridgeError> {
        let data = client
            .download_file(&row.image_url)
            .await
            .map_err(|e| BridgeError::Media(format!("emoji download: {}", e)))?;
        let mime = guess_image_mime(&row.image_url);
        let filename = format!("{}.{}", row.shortcode, mime_extension(mime));
        let mxc = self
            .homeserver
            .upload_media(data, mime, &filename)
            .await
            .map_err(|e| BridgeError::Media(format!("emoji upload: {}", e)))?;
        db::emoji::set_emoji_value(&self.db, &row.team_id, &row.shortcode, &mxc)?;
        Ok(mxc)
    }

    /// Full-team resync, single-flight per team.
    ///
    /// `force` skips the minimum-interval check (used for explicit resyncs
    /// and `emoji_changed` events).
    pub async fn resync(
        &self,
        client: &dyn SlackClient,
        team_id: &str,
        force: bool,
    ) -> Result<(), BridgeError> {
        let lock = self.team_lock(team_id).await;
        let _guard = lock.lock().await;

        // Re-check under the lock: another task may have just synced.
        if !force && !self.resync_due(team_id)? {
            debug!(team_id, "emoji resync skipped, within minimum interval");
            return Ok(());
        }

        let list = client.emoji_list().await.map_err(BridgeError::from)?;
        let rows: Vec<EmojiRow> = list
            .into_iter()
            .map(|(shortcode, value)| {
                if let Some(alias) = value.strip_prefix("alias:") {
                    EmojiRow {
                        team_id: team_id.to_owned(),
                        shortcode,
                        value: format!("alias:{}", alias),
                        image_url: String::new(),
                    }
                } else {
                    // Image URL; the mxc value is filled on first use.
                    EmojiRow {
                        team_id: team_id.to_owned(),
                        shortcode,
                        value: String::new(),
                        image_url: value,
                    }
                }
            })
            .collect();
        let count = rows.len();
        db::emoji::replace_team_emoji(&self.db, team_id, &rows)?;
        db::team::set_emoji_synced_at(&self.db, team_id, &Utc::now().to_rfc3339())?;
        info!(team_id, count, "team emoji resynced");
        Ok(())
    }

    fn resync_due(&self, team_id: &str) -> Result<bool, BridgeError> {
        let team = db::team::get_team(&self.db, team_id)?;
        let Some(synced_at) = team.and_then(|t| t.emoji_synced_at) else {
            return Ok(true);
        };
        match DateTime::parse_from_rfc3339(&synced_at) {
            Ok(synced) => Ok(Utc::now().signed_duration_since(synced.with_timezone(&Utc))
                > Duration::minutes(MIN_RESYNC_INTERVAL_MINS)),
            Err(_) => Ok(true),
        }
    }

    async fn team_lock(&self, team_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.resync_locks.lock().await;
        locks
            .entry(team_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Reverse lookup: shortcode for a reaction key that is an mxc URI.
    pub fn shortcode_for_mxc(&self, team_id: &str, mxc: &str) -> Option<String> {
        db::emoji::get_emoji_by_value(&self.db, team_id, mxc)
            .ok()
            .flatten()
            .map(|row| row.shortcode)
    }
}

// ---------------------------------------------------------------------------
// Static-table helpers
// ---------------------------------------------------------------------------

/// Shortcode → Unicode glyph via the static table only.
pub fn unicode_for_shortcode(shortcode: &str) -> Option<&'static str> {
    emojis::get_by_shortcode(shortcode).map(emojis::Emoji::as_str)
}

/// Unicode glyph → shortcode, for reactions coming from the homeserver.
pub fn shortcode_for_unicode(glyph: &str) -> Option<&'static str> {
    emojis::get(glyph).and_then(emojis::Emoji::shortcode)
}

fn guess_image_mime(url: &str) -> &'static str {
    let path = url.split('?').next().unwrap_or(url);
    if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "image/png"
    }
}

fn mime_extension(mime: &str) -> &'static str {
    match mime {
        "image/gif" => "gif",
        "image/jpeg" => "jpg",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_round_trip() {
        assert_eq!(unicode_for_shortcode("smile"), Some("😄"));
        assert_eq!(shortcode_for_unicode("😄"), Some("smile"));
        assert_eq!(unicode_for_shortcode("party-parrot"), None);
    }

    #[test]
    fn image_mime_guessing() {
        assert_eq!(guess_image_mime("https://x/parrot.gif"), "image/gif");
        assert_eq!(guess_image_mime("https://x/pic.jpeg?v=1"), "image/jpeg");
        assert_eq!(guess_image_mime("https://x/pic"), "image/png");
    }
}
