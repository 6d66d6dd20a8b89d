//! Team (workspace) rows.

use super::{Db, StoreError};
use rusqlite::{OptionalExtension, params};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamRow {
    pub team_id: String,
    pub name: String,
    pub domain: String,
    pub url: String,
    pub avatar_url: String,
    pub space_room: Option<String>,
    pub name_set: bool,
    pub avatar_set: bool,
    pub emoji_synced_at: Option<String>,
}

pub fn upsert_team(db: &Db, team: &TeamRow) -> Result<(), StoreError> {
    db.conn().execute(
        "INSERT INTO team (team_id, name, domain, url, avatar_url, space_room,
                           name_set, avatar_set, emoji_synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (team_id) DO UPDATE SET
             name = excluded.name,
             domain = excluded.domain,
             url = excluded.url,
             avatar_url = excluded.avatar_url,
             space_room = excluded.space_room,
             name_set = excluded.name_set,
             avatar_set = excluded.avatar_set,
             emoji_synced_at = excluded.emoji_synced_at",
        params![
            team.team_id,
            team.name,
            team.domain,
            team.url,
            team.avatar_url,
            team.space_room,
            team.name_set,
            team.avatar_set,
            team.emoji_synced_at,
        ],
    )?;
    Ok(())
}

pub fn get_team(db: &Db, team_id: &str) -> Result<Option<TeamRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            "SELECT team_id, name, domain, url, avatar_url, space_room,
                    name_set, avatar_set, emoji_synced_at
             FROM team WHERE team_id = ?1",
            params![team_id],
            map_team,
        )
        .optional()?;
    Ok(row)
}

pub fn set_space_room(db: &Db, team_id: &str, space_room: &str) -> Result<(), StoreError> {
    db.conn().execute(
        "UPDATE team SET space_room = ?2 WHERE team_id = ?1",
        params![team_id, space_room],
    )?;
    Ok(())
}

pub fn set_emoji_synced_at(db: &Db, team_id: &str, synced_at: &str) -> Result<(), StoreError> {
    db.conn().execute(
        "UPDATE team SET emoji_synced_at = ?2 WHERE team_id = ?1",
        params![team_id, synced_at],
    )?;
    Ok(())
}

fn map_team(row: &rusqlite::Row<'_>) -> Result<TeamRow, rusqlite::Error> {
    Ok(TeamRow {
        team_id: row.get(0)?,
        name: row.get(1)?,
        domain: row.get(2)?,
        url: row.get(3)?,
        avatar_url: row.get(4)?,
        space_room: row.get(5)?,
        name_set: row.get(6)?,
        avatar_set: row.get(7)?,
        emoji_synced_at: row.get(8)?,
    })
}
