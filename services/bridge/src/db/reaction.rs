//! Reaction rows.
//!
//! `(team, channel, message_ts, author, emoji)` is globally unique; a
//! duplicate add must surface as a constraint failure so the caller can
//! treat it as a no-op.

use super::{Db, StoreError};
use rusqlite::{OptionalExtension, params};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReactionRow {
    pub team_id: String,
    pub channel_id: String,
    pub message_ts: String,
    pub author_id: String,
    /// Shortcode without colons, or an mxc URI for custom emoji.
    pub emoji_id: String,
    pub mxid: String,
}

pub fn insert_reaction(db: &Db, row: &ReactionRow) -> Result<(), StoreError> {
    db.conn().execute(
        "INSERT INTO reaction (team_id, channel_id, message_ts, author_id, emoji_id, mxid)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            row.team_id,
            row.channel_id,
            row.message_ts,
            row.author_id,
            row.emoji_id,
            row.mxid,
        ],
    )?;
    Ok(())
}

pub fn get_reaction(
    db: &Db,
    team_id: &str,
    channel_id: &str,
    message_ts: &str,
    author_id: &str,
    emoji_id: &str,
) -> Result<Option<ReactionRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            &format!(
                "{} WHERE team_id = ?1 AND channel_id = ?2 AND message_ts = ?3
                 AND author_id = ?4 AND emoji_id = ?5",
                SELECT
            ),
            params![team_id, channel_id, message_ts, author_id, emoji_id],
            map_reaction,
        )
        .optional()?;
    Ok(row)
}

pub fn get_reaction_by_mxid(db: &Db, mxid: &str) -> Result<Option<ReactionRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            &format!("{} WHERE mxid = ?1", SELECT),
            params![mxid],
            map_reaction,
        )
        .optional()?;
    Ok(row)
}

pub fn delete_reaction(db: &Db, row: &ReactionRow) -> Result<(), StoreError> {
    db.conn().execute(
        "DELETE FROM reaction
         WHERE team_id = ?1 AND channel_id = ?2 AND message_ts = ?3
           AND author_id = ?4 AND emoji_id = ?5",
        params![
            row.team_id,
            row.channel_id,
            row.message_ts,
            row.author_id,
            row.emoji_id,
        ],
    )?;
    Ok(())
}

const SELECT: &str =
    "SELECT team_id, channel_id, message_ts, author_id, emoji_id, mxid FROM reaction";

fn map_reaction(row: &rusqlite::Row<'_>) -> Result<ReactionRow, rusqlite::Error> {
    Ok(ReactionRow {
        team_id: row.get(0)?,
        channel_id: row.get(1)?,
        message_ts: row.get(2)?,
        author_id: row.get(3)?,
        emoji_id: row.get(4)?,
        mxid: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_reaction_is_rejected() {
        let db = Db::open_in_memory().unwrap();
        let row = ReactionRow {
            team_id: "T1".into(),
            channel_id: "C1".into(),
            message_ts: "1.0".into(),
            author_id: "U2".into(),
            emoji_id: "smile".into(),
            mxid: "$r1".into(),
        };
        insert_reaction(&db, &row).unwrap();
        let dup = ReactionRow {
            mxid: "$r2".into(),
            ..row.clone()
        };
        assert!(insert_reaction(&db, &dup).unwrap_err().is_duplicate());
    }

    #[test]
    fn add_then_remove_leaves_no_row() {
        let db = Db::open_in_memory().unwrap();
        let row = ReactionRow {
            team_id: "T1".into(),
            channel_id: "C1".into(),
            message_ts: "1.0".into(),
            author_id: "U2".into(),
            emoji_id: "smile".into(),
            mxid: "$r1".into(),
        };
        insert_reaction(&db, &row).unwrap();
        delete_reaction(&db, &row).unwrap();
        assert!(
            get_reaction(&db, "T1", "C1", "1.0", "U2", "smile")
                .unwrap()
                .is_none()
        );
    }
}
