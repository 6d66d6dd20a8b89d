//! UserTeam (login) rows: one per (team, Slack user, local Matrix user).
//!
//! The session owns its token fields; everything else reads them through
//! these accessors.

use super::{Db, StoreError};
use rusqlite::{OptionalExtension, params};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserTeamRow {
    pub team_id: String,
    pub user_id: String,
    /// The local Matrix user this login belongs to.
    pub user_mxid: String,
    pub token: Option<String>,
    pub cookie_token: Option<String>,
    pub app_token: Option<String>,
    pub in_workspace: bool,
}

pub fn insert_user_team(db: &Db, row: &UserTeamRow) -> Result<(), StoreError> {
    db.conn().execute(
        "INSERT INTO user_team (team_id, user_id, user_mxid, token, cookie_token,
                                app_token, in_workspace)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.team_id,
            row.user_id,
            row.user_mxid,
            row.token,
            row.cookie_token,
            row.app_token,
            row.in_workspace,
        ],
    )?;
    Ok(())
}

pub fn update_user_team(db: &Db, row: &UserTeamRow) -> Result<(), StoreError> {
    db.conn().execute(
        "UPDATE user_team
         SET token = ?4, cookie_token = ?5, app_token = ?6, in_workspace = ?7
         WHERE team_id = ?1 AND user_id = ?2 AND user_mxid = ?3",
        params![
            row.team_id,
            row.user_id,
            row.user_mxid,
            row.token,
            row.cookie_token,
            row.app_token,
            row.in_workspace,
        ],
    )?;
    Ok(())
}

/// Clear all tokens after auth invalidation or logout.
pub fn clear_tokens(
    db: &Db,
    team_id: &str,
    user_id: &str,
    user_mxid: &str,
) -> Result<(), StoreError> {
    db.conn().execute(
        "UPDATE user_team SET token = NULL, cookie_token = NULL, app_token = NULL
         WHERE team_id = ?1 AND user_id = ?2 AND user_mxid = ?3",
        params![team_id, user_id, user_mxid],
    )?;
    Ok(())
}

pub fn delete_user_team(
    db: &Db,
    team_id: &str,
    user_id: &str,
    user_mxid: &str,
) -> Result<(), StoreError> {
    db.conn().execute(
        "DELETE FROM user_team WHERE team_id = ?1 AND user_id = ?2 AND user_mxid = ?3",
        params![team_id, user_id, user_mxid],
    )?;
    Ok(())
}

pub fn get_user_team(
    db: &Db,
    team_id: &str,
    user_id: &str,
    user_mxid: &str,
) -> Result<Option<UserTeamRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            "SELECT team_id, user_id, user_mxid, token, cookie_token, app_token, in_workspace
             FROM user_team WHERE team_id = ?1 AND user_id = ?2 AND user_mxid = ?3",
            params![team_id, user_id, user_mxid],
            map_user_team,
        )
        .optional()?;
    Ok(row)
}

/// All logins on one team, for last-local-user decisions.
pub fn user_teams_for_team(db: &Db, team_id: &str) -> Result<Vec<UserTeamRow>, StoreError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT team_id, user_id, user_mxid, token, cookie_token, app_token, in_workspace
         FROM user_team WHERE team_id = ?1",
    )?;
    let rows = stmt.query_map(params![team_id], map_user_team)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// All logins, for session startup.
pub fn all_user_teams(db: &Db) -> Result<Vec<UserTeamRow>, StoreError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT team_id, user_id, user_mxid, token, cookie_token, app_token, in_workspace
         FROM user_team ORDER BY team_id, user_id",
    )?;
    let rows = stmt.query_map([], map_user_team)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn map_user_team(row: &rusqlite::Row<'_>) -> Result<UserTeamRow, rusqlite::Error> {
    Ok(UserTeamRow {
        team_id: row.get(0)?,
        user_id: row.get(1)?,
        user_mxid: row.get(2)?,
        token: row.get(3)?,
        cookie_token: row.get(4)?,
        app_token: row.get(5)?,
        in_workspace: row.get(6)?,
    })
}
