//! Portal rows: one per bridged conversation.
//!
//! The portal-key→room mapping is monotonic: once `mxid` is set, re-bridging
//! reuses the room. `receiver` scopes DM portals to the local user who owns
//! them; it is empty for shared channels.

use super::{Db, StoreError};
use rusqlite::{OptionalExtension, params};
use sb_ids::PortalKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelType {
    #[default]
    Unknown,
    Channel,
    Dm,
    GroupDm,
}

impl ChannelType {
    pub fn as_i64(self) -> i64 {
        match self {
            ChannelType::Unknown => 0,
            ChannelType::Channel => 1,
            ChannelType::Dm => 2,
            ChannelType::GroupDm => 3,
        }
    }

    pub fn from_i64(v: i64) -> ChannelType {
        match v {
            1 => ChannelType::Channel,
            2 => ChannelType::Dm,
            3 => ChannelType::GroupDm,
            _ => ChannelType::Unknown,
        }
    }

    pub fn is_private_chat(self) -> bool {
        matches!(self, ChannelType::Dm | ChannelType::GroupDm)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortalRow {
    pub team_id: String,
    pub channel_id: String,
    pub receiver: String,
    pub channel_type: ChannelType,
    pub mxid: Option<String>,
    pub name: String,
    pub formatted_name: String,
    pub topic: String,
    pub avatar_url: String,
    pub encrypted: bool,
    pub in_space: bool,
    pub name_set: bool,
    pub avatar_set: bool,
    pub topic_set: bool,
    pub oldest_message_ts: Option<String>,
    pub more_to_backfill: bool,
}

impl PortalRow {
    pub fn key(&self) -> PortalKey {
        PortalKey::new(&self.team_id, &self.channel_id)
    }
}

pub fn upsert_portal(db: &Db, portal: &PortalRow) -> Result<(), StoreError> {
    db.conn().execute(
        "INSERT INTO portal (team_id, channel_id, receiver, channel_type, mxid,
                             name, formatted_name, topic, avatar_url, encrypted,
                             in_space, name_set, avatar_set, topic_set,
                             oldest_message_ts, more_to_backfill)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT (team_id, channel_id) DO UPDATE SET
             receiver = excluded.receiver,
             channel_type = excluded.channel_type,
             mxid = excluded.mxid,
             name = excluded.name,
             formatted_name = excluded.formatted_name,
             topic = excluded.topic,
             avatar_url = excluded.avatar_url,
             encrypted = excluded.encrypted,
             in_space = excluded.in_space,
             name_set = excluded.name_set,
             avatar_set = excluded.avatar_set,
             topic_set = excluded.topic_set,
             oldest_message_ts = excluded.oldest_message_ts,
             more_to_backfill = excluded.more_to_backfill",
        params![
            portal.team_id,
            portal.channel_id,
            portal.receiver,
            portal.channel_type.as_i64(),
            portal.mxid,
            portal.name,
            portal.formatted_name,
            portal.topic,
            portal.avatar_url,
            portal.encrypted,
            portal.in_space,
            portal.name_set,
            portal.avatar_set,
            portal.topic_set,
            portal.oldest_message_ts,
            portal.more_to_backfill,
        ],
    )?;
    Ok(())
}

pub fn get_portal(db: &Db, key: &PortalKey) -> Result<Option<PortalRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            &format!("{} WHERE team_id = ?1 AND channel_id = ?2", SELECT),
            params![key.team, key.channel],
            map_portal,
        )
        .optional()?;
    Ok(row)
}

pub fn get_portal_by_mxid(db: &Db, mxid: &str) -> Result<Option<PortalRow>, StoreError> {
    let row = db
        .conn()
        .query_row(
            &format!("{} WHERE mxid = ?1", SELECT),
            params![mxid],
            map_portal,
        )
        .optional()?;
    Ok(row)
}

pub fn portals_for_team(db: &Db, team_id: &str) -> Result<Vec<PortalRow>, StoreError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "{} WHERE team_id = ?1 ORDER BY channel_id",
        SELECT
    ))?;
    let rows = stmt.query_map(params![team_id], map_portal)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn delete_portal(db: &Db, key: &PortalKey) -> Result<(), StoreError> {
    let conn = db.conn();
    conn.execute(
        "DELETE FROM message WHERE team_id = ?1 AND channel_id = ?2",
        params![key.team, key.channel],
    )?;
    conn.execute(
        "DELETE FROM reaction WHERE team_id = ?1 AND channel_id = ?2",
        params![key.team, key.channel],
    )?;
    conn.execute(
        "DELETE FROM backfill_task WHERE team_id = ?1 AND channel_id = ?2",
        params![key.team, key.channel],
    )?;
    conn.execute(
        "DELETE FROM portal WHERE team_id = ?1 AND channel_id = ?2",
        params![key.team, key.channel],
    )?;
    Ok(())
}

const SELECT: &str = "SELECT team_id, channel_id, receiver, channel_type, mxid,
                             name, formatted_name, topic, avatar_url, encrypted,
                             in_space, name_set, avatar_set, topic_set,
                             oldest_message_ts, more_to_backfill
                      FROM portal";

fn map_portal(row: &rusqlite::Row<'_>) -> Result<PortalRow, rusqlite::Error> {
    Ok(PortalRow {
        team_id: row.get(0)?,
        channel_id: row.get(1)?,
        receiver: row.get(2)?,
        channel_type: ChannelType::from_i64(row.get(3)?),
        mxid: row.get(4)?,
        name: row.get(5)?,
        formatted_name: row.get(6)?,
        topic: row.get(7)?,
        avatar_url: row.get(8)?,
        encrypted: row.get(9)?,
        in_space: row.get(10)?,
        name_set: row.get(11)?,
        avatar_set: row.get(12)?,
        topic_set: row.get(13)?,
        oldest_message_ts: row.get(14)?,
        more_to_backfill: row.get(15)?,
    })
}
