//! Puppet (ghost) rows.

use super::{Db, StoreError};
use rusqlite::{OptionalExtension, params};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PuppetRow {
    pub team_id: String,
    pub user_id: String,
    pub name: String,
    pub avatar_url: String,
    pub avatar_mxc: String,
    pub is_bot: bool,
    pub name_set: bool,
    pub avatar_set: bool,
    pub contact_info_set: bool,
    /// RFC 3339; gates the users.info refresh interval.
    pub last_synced_at: Option<String>,
}

pub fn upsert_puppet(db: &Db, puppet: &PuppetRow) -> Result<(), StoreError> {
    db.conn().execute(
        "INSERT INTO puppet (team_id, user_id, name, avatar_url, avatar_mxc, is_bot,
                             name_set, avatar_set, contact_info_set, last_synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT (team_id, user_id) DO UPDATE SET
             name = excluded.name,
             avatar_url = excluded.avatar_url,
             avatar_mxc = excluded.avatar_mxc,
             is_bot = excluded.is_bot,
             name_set = excluded.name_set,
             avatar_set = excluded.avatar_set,
             contact_info_set = excluded.contact_info_set,
             last_synced_at = excluded.last_synced_at",
        params![
            puppet.team_id,
            puppet.user_id,
            puppet.name,
            puppet.avatar_url,
            puppet.avatar_mxc,
            puppet.is_bot,
            puppet.name_set,
            puppet.avatar_set,
            puppet.contact_info_set,
            puppet.last_synced_at,
        ],
    )?;
    Ok(())
}

pub fn get_puppet(db: &Db, team_id: &str, user_id: &str) -> Result<Option<PuppetRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            "SELECT team_id, user_id, name, avatar_url, avatar_mxc, is_bot,
                    name_set, avatar_set, contact_info_set, last_synced_at
             FROM puppet WHERE team_id = ?1 AND user_id = ?2",
            params![team_id, user_id],
            map_puppet,
        )
        .optional()?;
    Ok(row)
}

fn map_puppet(row: &rusqlite::Row<'_>) -> Result<PuppetRow, rusqlite::Error> {
    Ok(PuppetRow {
        team_id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        avatar_url: row.get(3)?,
        avatar_mxc: row.get(4)?,
        is_bot: row.get(5)?,
        name_set: row.get(6)?,
        avatar_set: row.get(7)?,
        contact_info_set: row.get(8)?,
        last_synced_at: row.get(9)?,
    })
}
