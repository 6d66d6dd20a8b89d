//! Durable SQLite store for bridge entities.
//!
//! # SQLite settings
//! Applied at open: WAL, synchronous=FULL, foreign_keys=ON. PRAGMA
//! integrity_check runs at open; returns error if it fails.
//!
//! # Uniqueness
//! The schema enforces the identity invariants (message parts, reaction
//! keys, room mapping) with UNIQUE constraints. `insert_*` functions fail
//! loudly on duplicates; callers that want at-most-once semantics check
//! `StoreError::is_duplicate`.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod backfill_task;
pub mod emoji;
pub mod message;
pub mod portal;
pub mod puppet;
pub mod reaction;
pub mod team;
pub mod user_team;

pub use backfill_task::BackfillTaskRow;
pub use emoji::EmojiRow;
pub use message::MessageRow;
pub use portal::{ChannelType, PortalRow};
pub use puppet::PuppetRow;
pub use reaction::ReactionRow;
pub use team::TeamRow;
pub use user_team::UserTeamRow;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
}

impl StoreError {
    /// True when an insert hit a UNIQUE/PRIMARY KEY constraint.
    pub fn is_duplicate(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Db
// ---------------------------------------------------------------------------

/// The store for a single bridge instance.
///
/// Operations are short synchronous statements behind a mutex; nothing here
/// performs network I/O, so holding the guard across a call is safe.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Db, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Db, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Db, StoreError> {
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(StoreError::IntegrityCheckFailed(result));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopen_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sqlite3");
        {
            let db = Db::open(&path).unwrap();
            team::upsert_team(
                &db,
                &TeamRow {
                    team_id: "T1".into(),
                    name: "Workspace".into(),
                    ..TeamRow::default()
                },
            )
            .unwrap();
        }
        let db = Db::open(&path).unwrap();
        let row = team::get_team(&db, "T1").unwrap().unwrap();
        assert_eq!(row.name, "Workspace");
    }

    #[test]
    fn open_in_memory_applies_schema() {
        let db = Db::open_in_memory().unwrap();
        // A query against each table proves the schema applied.
        let conn = db.conn();
        for table in [
            "team",
            "user_team",
            "portal",
            "puppet",
            "message",
            "reaction",
            "backfill_task",
            "emoji",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
                    r.get(0)
                })
                .unwrap();
            assert_eq!(count, 0);
        }
    }
}
