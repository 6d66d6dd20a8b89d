//! Message part rows.
//!
//! One row per emitted homeserver event. `message_ts` is the Slack timestamp
//! byte-for-byte; `part_id` is empty for the text part. Rows are never
//! mutated — only inserted after successful bridging and deleted on remote
//! deletion.

use super::{Db, StoreError};
use rusqlite::{OptionalExtension, params};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageRow {
    pub team_id: String,
    pub channel_id: String,
    pub message_ts: String,
    pub part_id: String,
    pub part_index: i64,
    /// Empty for non-thread messages and thread roots.
    pub thread_root_ts: String,
    pub author_id: String,
    pub mxid: String,
}

/// Insert one part row; fails loudly on a duplicate part key or event ID.
pub fn insert_message(db: &Db, row: &MessageRow) -> Result<(), StoreError> {
    db.conn().execute(
        "INSERT INTO message (team_id, channel_id, message_ts, part_id, part_index,
                              thread_root_ts, author_id, mxid)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.team_id,
            row.channel_id,
            row.message_ts,
            row.part_id,
            row.part_index,
            row.thread_root_ts,
            row.author_id,
            row.mxid,
        ],
    )?;
    Ok(())
}

pub fn get_part(
    db: &Db,
    team_id: &str,
    channel_id: &str,
    message_ts: &str,
    part_id: &str,
) -> Result<Option<MessageRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            &format!(
                "{} WHERE team_id = ?1 AND channel_id = ?2 AND message_ts = ?3 AND part_id = ?4",
                SELECT
            ),
            params![team_id, channel_id, message_ts, part_id],
            map_message,
        )
        .optional()?;
    Ok(row)
}

/// All parts of one message, in stored part order.
pub fn get_parts(
    db: &Db,
    team_id: &str,
    channel_id: &str,
    message_ts: &str,
) -> Result<Vec<MessageRow>, StoreError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "{} WHERE team_id = ?1 AND channel_id = ?2 AND message_ts = ?3 ORDER BY part_index ASC",
        SELECT
    ))?;
    let rows = stmt.query_map(params![team_id, channel_id, message_ts], map_message)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn get_by_mxid(db: &Db, mxid: &str) -> Result<Option<MessageRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            &format!("{} WHERE mxid = ?1", SELECT),
            params![mxid],
            map_message,
        )
        .optional()?;
    Ok(row)
}

pub fn get_first_part(
    db: &Db,
    team_id: &str,
    channel_id: &str,
    message_ts: &str,
) -> Result<Option<MessageRow>, StoreError> {
    bound_part(db, team_id, channel_id, message_ts, "ASC")
}

pub fn get_last_part(
    db: &Db,
    team_id: &str,
    channel_id: &str,
    message_ts: &str,
) -> Result<Option<MessageRow>, StoreError> {
    bound_part(db, team_id, channel_id, message_ts, "DESC")
}

fn bound_part(
    db: &Db,
    team_id: &str,
    channel_id: &str,
    message_ts: &str,
    order: &str,
) -> Result<Option<MessageRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            &format!(
                "{} WHERE team_id = ?1 AND channel_id = ?2 AND message_ts = ?3
                 ORDER BY part_index {} LIMIT 1",
                SELECT, order
            ),
            params![team_id, channel_id, message_ts],
            map_message,
        )
        .optional()?;
    Ok(row)
}

/// The newest part in a thread: the last part of the most recent reply, or
/// of the root itself when no replies are stored yet.
pub fn get_last_in_thread(
    db: &Db,
    team_id: &str,
    channel_id: &str,
    thread_root_ts: &str,
) -> Result<Option<MessageRow>, StoreError> {
    let reply = db
        .conn()
        .query_row(
            &format!(
                "{} WHERE team_id = ?1 AND channel_id = ?2 AND thread_root_ts = ?3
                 ORDER BY message_ts DESC, part_index DESC LIMIT 1",
                SELECT
            ),
            params![team_id, channel_id, thread_root_ts],
            map_message,
        )
        .optional()?;
    match reply {
        Some(row) => Ok(Some(row)),
        None => get_last_part(db, team_id, channel_id, thread_root_ts),
    }
}

/// Timestamp of the newest bridged message in a portal (the forward-fill
/// anchor), by parsed timestamp order.
pub fn get_latest_message_ts(
    db: &Db,
    team_id: &str,
    channel_id: &str,
) -> Result<Option<String>, StoreError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT DISTINCT message_ts FROM message WHERE team_id = ?1 AND channel_id = ?2",
    )?;
    let rows = stmt.query_map(params![team_id, channel_id], |r| r.get::<_, String>(0))?;
    let mut latest: Option<(chrono::DateTime<chrono::Utc>, String)> = None;
    for r in rows {
        let ts = r?;
        if !sb_ids::is_valid_slack_ts(&ts) {
            continue;
        }
        let parsed = sb_ids::parse_slack_ts(&ts);
        if latest.as_ref().is_none_or(|(best, _)| parsed > *best) {
            latest = Some((parsed, ts));
        }
    }
    Ok(latest.map(|(_, ts)| ts))
}

pub fn delete_part(
    db: &Db,
    team_id: &str,
    channel_id: &str,
    message_ts: &str,
    part_id: &str,
) -> Result<(), StoreError> {
    db.conn().execute(
        "DELETE FROM message
         WHERE team_id = ?1 AND channel_id = ?2 AND message_ts = ?3 AND part_id = ?4",
        params![team_id, channel_id, message_ts, part_id],
    )?;
    Ok(())
}

pub fn delete_all_parts(
    db: &Db,
    team_id: &str,
    channel_id: &str,
    message_ts: &str,
) -> Result<(), StoreError> {
    db.conn().execute(
        "DELETE FROM message WHERE team_id = ?1 AND channel_id = ?2 AND message_ts = ?3",
        params![team_id, channel_id, message_ts],
    )?;
    Ok(())
}

const SELECT: &str = "SELECT team_id, channel_id, message_ts, part_id, part_index,
                             thread_root_ts, author_id, mxid
                      FROM message";

fn map_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        team_id: row.get(0)?,
        channel_id: row.get(1)?,
        message_ts: row.get(2)?,
        part_id: row.get(3)?,
        part_index: row.get(4)?,
        thread_root_ts: row.get(5)?,
        author_id: row.get(6)?,
        mxid: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: &str, part_id: &str, part_index: i64, root: &str, mxid: &str) -> MessageRow {
        MessageRow {
            team_id: "T1".into(),
            channel_id: "C1".into(),
            message_ts: ts.into(),
            part_id: part_id.into(),
            part_index,
            thread_root_ts: root.into(),
            author_id: "U1".into(),
            mxid: mxid.into(),
        }
    }

    #[test]
    fn duplicate_part_insert_fails_loudly() {
        let db = Db::open_in_memory().unwrap();
        insert_message(&db, &row("1.0", "", 0, "", "$a")).unwrap();
        let err = insert_message(&db, &row("1.0", "", 0, "", "$b")).unwrap_err();
        assert!(err.is_duplicate());
    }

    #[test]
    fn first_and_last_part_order_by_index() {
        let db = Db::open_in_memory().unwrap();
        insert_message(&db, &row("1.0", "file-0-F1", 0, "", "$file")).unwrap();
        insert_message(&db, &row("1.0", "", 1, "", "$text")).unwrap();
        let first = get_first_part(&db, "T1", "C1", "1.0").unwrap().unwrap();
        let last = get_last_part(&db, "T1", "C1", "1.0").unwrap().unwrap();
        assert_eq!(first.mxid, "$file");
        assert_eq!(last.mxid, "$text");
    }

    #[test]
    fn thread_latest_falls_back_to_root() {
        let db = Db::open_in_memory().unwrap();
        insert_message(&db, &row("1.0", "", 0, "", "$root")).unwrap();
        let latest = get_last_in_thread(&db, "T1", "C1", "1.0").unwrap().unwrap();
        assert_eq!(latest.mxid, "$root");

        insert_message(&db, &row("2.0", "", 0, "1.0", "$reply")).unwrap();
        let latest = get_last_in_thread(&db, "T1", "C1", "1.0").unwrap().unwrap();
        assert_eq!(latest.mxid, "$reply");
    }
}
