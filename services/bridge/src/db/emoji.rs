//! Custom emoji rows.
//!
//! `value` holds the resolved form: a Unicode glyph, an `alias:<shortcode>`
//! redirect, or the mxc URI of the reuploaded image. A full team resync
//! replaces the whole set in one transaction.

use super::{Db, StoreError};
use rusqlite::{OptionalExtension, params};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmojiRow {
    pub team_id: String,
    pub shortcode: String,
    pub value: String,
    /// Original Slack image URL, kept for re-upload decisions.
    pub image_url: String,
}

/// Replace the team's entire emoji set.
pub fn replace_team_emoji(db: &Db, team_id: &str, rows: &[EmojiRow]) -> Result<(), StoreError> {
    let mut conn = db.conn();
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM emoji WHERE team_id = ?1", params![team_id])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO emoji (team_id, shortcode, value, image_url)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for row in rows {
            stmt.execute(params![team_id, row.shortcode, row.value, row.image_url])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn get_emoji(db: &Db, team_id: &str, shortcode: &str) -> Result<Option<EmojiRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            "SELECT team_id, shortcode, value, image_url
             FROM emoji WHERE team_id = ?1 AND shortcode = ?2",
            params![team_id, shortcode],
            map_emoji,
        )
        .optional()?;
    Ok(row)
}

/// Fill in the resolved value (mxc URI) after a lazy reupload.
pub fn set_emoji_value(
    db: &Db,
    team_id: &str,
    shortcode: &str,
    value: &str,
) -> Result<(), StoreError> {
    db.conn().execute(
        "UPDATE emoji SET value = ?3 WHERE team_id = ?1 AND shortcode = ?2",
        params![team_id, shortcode, value],
    )?;
    Ok(())
}

/// Reverse lookup by resolved value (used for custom-emoji reactions coming
/// from the homeserver as mxc URIs).
pub fn get_emoji_by_value(
    db: &Db,
    team_id: &str,
    value: &str,
) -> Result<Option<EmojiRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            "SELECT team_id, shortcode, value, image_url
             FROM emoji WHERE team_id = ?1 AND value = ?2",
            params![team_id, value],
            map_emoji,
        )
        .optional()?;
    Ok(row)
}

fn map_emoji(row: &rusqlite::Row<'_>) -> Result<EmojiRow, rusqlite::Error> {
    Ok(EmojiRow {
        team_id: row.get(0)?,
        shortcode: row.get(1)?,
        value: row.get(2)?,
        image_url: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resync_overwrites_previous_set() {
        let db = Db::open_in_memory().unwrap();
        replace_team_emoji(
            &db,
            "T1",
            &[EmojiRow {
                team_id: "T1".into(),
                shortcode: "old".into(),
                value: "mxc://x/old".into(),
                image_url: String::new(),
            }],
        )
        .unwrap();
        replace_team_emoji(
            &db,
            "T1",
            &[EmojiRow {
                team_id: "T1".into(),
                shortcode: "party-parrot".into(),
                value: "mxc://x/parrot".into(),
                image_url: "https://emoji.example/parrot.gif".into(),
            }],
        )
        .unwrap();

        assert!(get_emoji(&db, "T1", "old").unwrap().is_none());
        let parrot = get_emoji(&db, "T1", "party-parrot").unwrap().unwrap();
        assert_eq!(parrot.value, "mxc://x/parrot");
        let reverse = get_emoji_by_value(&db, "T1", "mxc://x/parrot").unwrap().unwrap();
        assert_eq!(reverse.shortcode, "party-parrot");
    }
}
