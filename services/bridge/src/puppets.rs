//! Ghost (puppet) management.
//!
//! Ghost profile data comes from batched `users.info` calls and is cached in
//! the store. Refreshes are rate-limited to once per puppet per four hours;
//! within the window the cached row is authoritative even if stale.

use crate::config::PortalConfig;
use crate::db::{self, Db, PuppetRow};
use crate::error::BridgeError;
use chrono::{DateTime, Duration, Utc};
use sb_matrix::{Homeserver, Mxid};
use sb_slack::SlackClient;
use sb_slack::types::UserInfo;
use std::sync::Arc;
use tracing::{debug, warn};

/// Minimum interval between users.info refreshes for one puppet.
pub const PUPPET_REFRESH_INTERVAL_HOURS: i64 = 4;

/// Shared puppet accessor: store-backed cache over the Slack user API.
pub struct Puppets {
    db: Arc<Db>,
    homeserver: Arc<dyn Homeserver>,
    config: PortalConfig,
}

impl Puppets {
    pub fn new(db: Arc<Db>, homeserver: Arc<dyn Homeserver>, config: PortalConfig) -> Puppets {
        Puppets {
            db,
            homeserver,
            config,
        }
    }

    pub fn ghost_mxid(&self, team_id: &str, user_id: &str) -> Mxid {
        self.config
            .ghost_mxid(team_id, user_id, self.homeserver.domain())
    }

    /// Cached row, or a fetch when missing or older than the refresh floor.
    pub async fn get_or_fetch(
        &self,
        client: &dyn SlackClient,
        team_id: &str,
        user_id: &str,
    ) -> Result<Option<PuppetRow>, BridgeError> {
        if let Some(row) = db::puppet::get_puppet(&self.db, team_id, user_id)? {
            if !needs_refresh(&row, Utc::now()) {
                return Ok(Some(row));
            }
        }
        self.fetch_and_store(client, team_id, &[user_id.to_owned()])
            .await?;
        Ok(db::puppet::get_puppet(&self.db, team_id, user_id)?)
    }

    /// Batched refresh: one users.info call covering every given ID, then a
    /// profile push for each ghost whose data changed.
    pub async fn fetch_and_store(
        &self,
        client: &dyn SlackClient,
        team_id: &str,
        user_ids: &[String],
    ) -> Result<(), BridgeError> {
        if user_ids.is_empty() {
            return Ok(());
        }
        debug!(team_id, count = user_ids.len(), "refreshing puppets");
        let infos = match client.users_info(user_ids).await {
            Ok(infos) => infos,
            Err(e) if e.is_auth_invalidated() => return Err(BridgeError::AuthInvalidated),
            Err(e) => {
                warn!(error = %e, "users.info failed; keeping cached puppets");
                return Ok(());
            }
        };
        for info in infos {
            self.store_user_info(team_id, &info).await?;
        }
        Ok(())
    }

    /// Upsert one puppet from a user-info object and sync the ghost profile.
    pub async fn store_user_info(
        &self,
        team_id: &str,
        info: &UserInfo,
    ) -> Result<PuppetRow, BridgeError> {
        let existing = db::puppet::get_puppet(&self.db, team_id, &info.id)?;
        let name = self.config.ghost_displayname(info.display_name());
        let avatar_url = info.profile.image_512.clone();

        let ghost = self.ghost_mxid(team_id, &info.id);
        let name_changed = existing.as_ref().map(|p| p.name.as_str()) != Some(name.as_str());
        let avatar_changed =
            existing.as_ref().map(|p| p.avatar_url.as_str()) != Some(avatar_url.as_str());

        let mut row = existing.unwrap_or_else(|| PuppetRow {
            team_id: team_id.to_owned(),
            user_id: info.id.clone(),
            ..PuppetRow::default()
        });
        row.name = name.clone();
        row.avatar_url = avatar_url;
        row.is_bot = info.is_bot;
        row.last_synced_at = Some(Utc::now().to_rfc3339());

        if name_changed || !row.name_set {
            match self.homeserver.set_ghost_display_name(&ghost, &name).await {
                Ok(()) => row.name_set = true,
                Err(e) => warn!(ghost = %ghost, error = %e, "ghost display name update failed"),
            }
        }
        if avatar_changed {
            // Avatar bytes are re-uploaded lazily by the media path; only the
            // source URL is tracked here.
            row.avatar_set = false;
        }
        row.contact_info_set = true;

        db::puppet::upsert_puppet(&self.db, &row)?;
        Ok(row)
    }

    /// Display name for mentions, without triggering a fetch.
    pub fn cached_display_name(&self, team_id: &str, user_id: &str) -> Option<String> {
        db::puppet::get_puppet(&self.db, team_id, user_id)
            .ok()
            .flatten()
            .map(|p| p.name)
    }
}

/// Whether a batched refresh should include this user at all.
pub(crate) fn puppet_needs_refresh(db: &Db, team_id: &str, user_id: &str) -> bool {
    match db::puppet::get_puppet(db, team_id, user_id) {
        Ok(Some(row)) => needs_refresh(&row, Utc::now()),
        _ => true,
    }
}

/// Nameless puppets shorten the resync debounce to one second.
pub(crate) fn puppet_has_name(db: &Db, team_id: &str, user_id: &str) -> bool {
    matches!(
        db::puppet::get_puppet(db, team_id, user_id),
        Ok(Some(row)) if !row.name.is_empty()
    )
}

fn needs_refresh(row: &PuppetRow, now: DateTime<Utc>) -> bool {
    match &row.last_synced_at {
        None => true,
        Some(ts) => match DateTime::parse_from_rfc3339(ts) {
            Ok(synced) => {
                now.signed_duration_since(synced.with_timezone(&Utc))
                    > Duration::hours(PUPPET_REFRESH_INTERVAL_HOURS)
            }
            Err(_) => true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_synced_at(ts: Option<String>) -> PuppetRow {
        PuppetRow {
            team_id: "T1".into(),
            user_id: "U1".into(),
            last_synced_at: ts,
            ..PuppetRow::default()
        }
    }

    #[test]
    fn refresh_floor_is_four_hours() {
        let now = Utc::now();
        assert!(needs_refresh(&row_synced_at(None), now));
        let recent = (now - Duration::hours(1)).to_rfc3339();
        assert!(!needs_refresh(&row_synced_at(Some(recent)), now));
        let stale = (now - Duration::hours(5)).to_rfc3339();
        assert!(needs_refresh(&row_synced_at(Some(stale)), now));
        assert!(needs_refresh(&row_synced_at(Some("garbage".into())), now));
    }
}
