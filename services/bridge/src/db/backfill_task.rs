//! Backfill task rows: one per (portal, local user).
//!
//! These rows double as the record of which portals a user participates in;
//! the channel-sync orphan sweep reads them back.
//!
//! Timestamps are RFC 3339 strings so lexicographic comparison matches
//! chronological order in SQL.

use super::{Db, StoreError};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, params};

/// A dispatched task is considered stale (re-selectable) after this long.
const DISPATCH_STALE_HOURS: i64 = 2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillTaskRow {
    pub team_id: String,
    pub channel_id: String,
    pub user_mxid: String,
    pub priority: i64,
    pub finished: bool,
    pub backfilled_count: i64,
    pub dispatched_at: Option<String>,
    pub completed_at: Option<String>,
    pub cooldown_until: Option<String>,
}

/// Create the task if it does not exist yet; existing rows are untouched.
pub fn ensure_task(
    db: &Db,
    team_id: &str,
    channel_id: &str,
    user_mxid: &str,
    priority: i64,
) -> Result<(), StoreError> {
    db.conn().execute(
        "INSERT OR IGNORE INTO backfill_task
             (team_id, channel_id, user_mxid, priority)
         VALUES (?1, ?2, ?3, ?4)",
        params![team_id, channel_id, user_mxid, priority],
    )?;
    Ok(())
}

/// Select the next task to run.
///
/// Eligible: unfinished, not cooling down, and either never dispatched,
/// dispatched over two hours ago, or already completed (re-dispatchable).
/// Ordered by dispatched-at ascending with never-dispatched first.
pub fn get_next_task(db: &Db, now: DateTime<Utc>) -> Result<Option<BackfillTaskRow>, StoreError> {
    let stale = (now - Duration::hours(DISPATCH_STALE_HOURS)).to_rfc3339();
    let now_str = now.to_rfc3339();
    let row = db
        .conn()
        .query_row(
            "SELECT team_id, channel_id, user_mxid, priority, finished, backfilled_count,
                    dispatched_at, completed_at, cooldown_until
             FROM backfill_task
             WHERE finished = 0
               AND (cooldown_until IS NULL OR cooldown_until < ?2)
               AND (dispatched_at IS NULL OR dispatched_at < ?1 OR completed_at IS NOT NULL)
             ORDER BY dispatched_at ASC NULLS FIRST
             LIMIT 1",
            params![stale, now_str],
            map_task,
        )
        .optional()?;
    Ok(row)
}

pub fn mark_dispatched(
    db: &Db,
    task: &BackfillTaskRow,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    db.conn().execute(
        "UPDATE backfill_task SET dispatched_at = ?4, completed_at = NULL
         WHERE team_id = ?1 AND channel_id = ?2 AND user_mxid = ?3",
        params![
            task.team_id,
            task.channel_id,
            task.user_mxid,
            now.to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Record a completed batch: bump the count, stamp completion, and set the
/// finished flag when there is nothing left to fetch.
pub fn mark_completed(
    db: &Db,
    task: &BackfillTaskRow,
    batch_count: i64,
    finished: bool,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    db.conn().execute(
        "UPDATE backfill_task
         SET backfilled_count = backfilled_count + ?4,
             completed_at = ?5,
             finished = ?6,
             cooldown_until = NULL
         WHERE team_id = ?1 AND channel_id = ?2 AND user_mxid = ?3",
        params![
            task.team_id,
            task.channel_id,
            task.user_mxid,
            batch_count,
            now.to_rfc3339(),
            finished,
        ],
    )?;
    Ok(())
}

pub fn set_cooldown(
    db: &Db,
    task: &BackfillTaskRow,
    until: DateTime<Utc>,
) -> Result<(), StoreError> {
    db.conn().execute(
        "UPDATE backfill_task SET cooldown_until = ?4, completed_at = ?4
         WHERE team_id = ?1 AND channel_id = ?2 AND user_mxid = ?3",
        params![
            task.team_id,
            task.channel_id,
            task.user_mxid,
            until.to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Channel IDs of every portal the user has a task row for, keyed by team.
pub fn channels_for_user(
    db: &Db,
    team_id: &str,
    user_mxid: &str,
) -> Result<Vec<String>, StoreError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT channel_id FROM backfill_task WHERE team_id = ?1 AND user_mxid = ?2",
    )?;
    let rows = stmt.query_map(params![team_id, user_mxid], |r| r.get(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn delete_tasks_for_user(db: &Db, team_id: &str, user_mxid: &str) -> Result<(), StoreError> {
    db.conn().execute(
        "DELETE FROM backfill_task WHERE team_id = ?1 AND user_mxid = ?2",
        params![team_id, user_mxid],
    )?;
    Ok(())
}

fn map_task(row: &rusqlite::Row<'_>) -> Result<BackfillTaskRow, rusqlite::Error> {
    Ok(BackfillTaskRow {
        team_id: row.get(0)?,
        channel_id: row.get(1)?,
        user_mxid: row.get(2)?,
        priority: row.get(3)?,
        finished: row.get(4)?,
        backfilled_count: row.get(5)?,
        dispatched_at: row.get(6)?,
        completed_at: row.get(7)?,
        cooldown_until: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_dispatched_is_selected_first() {
        let db = Db::open_in_memory().unwrap();
        ensure_task(&db, "T1", "C_old", "@u:x", 0).unwrap();
        ensure_task(&db, "T1", "C_new", "@u:x", 0).unwrap();
        let now = Utc::now();

        let first = get_next_task(&db, now).unwrap().unwrap();
        mark_dispatched(&db, &first, now).unwrap();
        // The other (never dispatched) task comes next.
        let second = get_next_task(&db, now).unwrap().unwrap();
        assert_ne!(first.channel_id, second.channel_id);
    }

    #[test]
    fn cooldown_excludes_task_until_expiry() {
        let db = Db::open_in_memory().unwrap();
        ensure_task(&db, "T1", "C1", "@u:x", 0).unwrap();
        let now = Utc::now();
        let task = get_next_task(&db, now).unwrap().unwrap();
        set_cooldown(&db, &task, now + Duration::hours(1)).unwrap();

        assert!(get_next_task(&db, now).unwrap().is_none());
        assert!(
            get_next_task(&db, now + Duration::hours(2))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn finished_task_is_never_selected() {
        let db = Db::open_in_memory().unwrap();
        ensure_task(&db, "T1", "C1", "@u:x", 0).unwrap();
        let now = Utc::now();
        let task = get_next_task(&db, now).unwrap().unwrap();
        mark_completed(&db, &task, 20, true, now).unwrap();
        assert!(get_next_task(&db, now).unwrap().is_none());
    }

    #[test]
    fn completed_but_unfinished_is_redispatchable() {
        let db = Db::open_in_memory().unwrap();
        ensure_task(&db, "T1", "C1", "@u:x", 0).unwrap();
        let now = Utc::now();
        let task = get_next_task(&db, now).unwrap().unwrap();
        mark_dispatched(&db, &task, now).unwrap();
        mark_completed(&db, &task, 50, false, now).unwrap();

        let again = get_next_task(&db, now).unwrap().unwrap();
        assert_eq!(again.backfilled_count, 50);
        assert!(!again.finished);
    }
}
