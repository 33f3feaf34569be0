//! Event repository — row-level operations on the `events` table.
//!
//! Events are keyed by `event_id` and partitioned by `room_id`. Writes are
//! upsert-shaped (`ON CONFLICT DO NOTHING`), and every page query is a range
//! scan on the `(room_id, origin_server_ts)` index, newest first, with `seq`
//! breaking timestamp ties.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::record::{EventRecord, LocalStatus};
use crate::sqlite::row_types::{EVENT_COLUMNS, EventRow};

/// Per-room aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomStats {
    /// Room ID.
    pub room_id: String,
    /// Stored events.
    pub count: i64,
    /// Oldest `origin_server_ts`.
    pub oldest_ts: i64,
    /// Newest `origin_server_ts`.
    pub newest_ts: i64,
}

/// Event repository — stateless, every method takes `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Insert unless `event_id` already exists. Returns whether a row was written.
    pub fn insert_or_ignore(conn: &Connection, record: &EventRecord) -> Result<bool> {
        let content = serde_json::to_string(&record.content)?;
        let unsigned = record
            .unsigned
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let changed = conn.execute(
            "INSERT INTO events (event_id, room_id, type, content, origin_server_ts, sender,
                                 state_key, txn_id, membership, unsigned, redacts, local_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(event_id) DO NOTHING",
            params![
                record.event_id,
                record.room_id,
                record.event_type,
                content,
                record.origin_server_ts,
                record.sender,
                record.state_key,
                record.txn_id,
                record.membership,
                unsigned,
                record.redacts,
                record.local_status.map(LocalStatus::as_str),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Fill columns that are NULL in storage from `record`, and stub content
    /// (JSON `null`). Present columns are left untouched.
    pub fn fill_absent(conn: &Connection, record: &EventRecord) -> Result<()> {
        let content = serde_json::to_string(&record.content)?;
        let unsigned = record
            .unsigned
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let _ = conn.execute(
            "UPDATE events SET
                 state_key    = COALESCE(state_key, ?2),
                 txn_id       = COALESCE(txn_id, ?3),
                 membership   = COALESCE(membership, ?4),
                 unsigned     = COALESCE(unsigned, ?5),
                 redacts      = COALESCE(redacts, ?6),
                 local_status = COALESCE(local_status, ?7),
                 content      = CASE WHEN content = 'null' THEN ?8 ELSE content END
             WHERE event_id = ?1",
            params![
                record.event_id,
                record.state_key,
                record.txn_id,
                record.membership,
                unsigned,
                record.redacts,
                record.local_status.map(LocalStatus::as_str),
                content,
            ],
        )?;
        Ok(())
    }

    /// Get a single event by ID.
    pub fn get_by_id(conn: &Connection, event_id: &str) -> Result<Option<EventRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = ?1"),
                params![event_id],
                EventRow::map,
            )
            .optional()?;
        Ok(row)
    }

    /// Most recent event in `room_id` carrying `txn_id`.
    pub fn get_by_txn_id(conn: &Connection, room_id: &str, txn_id: &str) -> Result<Option<EventRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE room_id = ?1 AND txn_id = ?2
                     ORDER BY seq DESC LIMIT 1"
                ),
                params![room_id, txn_id],
                EventRow::map,
            )
            .optional()?;
        Ok(row)
    }

    /// Up to `limit` events with `origin_server_ts < before_ts`, newest first.
    pub fn page_before_ts(
        conn: &Connection,
        room_id: &str,
        before_ts: i64,
        limit: u32,
    ) -> Result<Vec<EventRow>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE room_id = ?1 AND origin_server_ts < ?2
             ORDER BY origin_server_ts DESC, seq DESC
             LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![room_id, before_ts, limit], EventRow::map)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Keyset page strictly after `(ts, seq)` in newest-first order.
    pub fn page_before_position(
        conn: &Connection,
        room_id: &str,
        ts: i64,
        seq: i64,
        limit: u32,
    ) -> Result<Vec<EventRow>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE room_id = ?1
               AND (origin_server_ts < ?2 OR (origin_server_ts = ?2 AND seq < ?3))
             ORDER BY origin_server_ts DESC, seq DESC
             LIMIT ?4"
        ))?;
        let rows = stmt
            .query_map(params![room_id, ts, seq, limit], EventRow::map)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Newest stored timestamp for a room.
    pub fn newest_ts(conn: &Connection, room_id: &str) -> Result<Option<i64>> {
        let ts = conn.query_row(
            "SELECT MAX(origin_server_ts) FROM events WHERE room_id = ?1",
            params![room_id],
            |row| row.get(0),
        )?;
        Ok(ts)
    }

    /// Oldest stored timestamp for a room.
    pub fn oldest_ts(conn: &Connection, room_id: &str) -> Result<Option<i64>> {
        let ts = conn.query_row(
            "SELECT MIN(origin_server_ts) FROM events WHERE room_id = ?1",
            params![room_id],
            |row| row.get(0),
        )?;
        Ok(ts)
    }

    /// Count events in a room.
    pub fn count_by_room(conn: &Connection, room_id: &str) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE room_id = ?1",
            params![room_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Aggregate per room, ordered by room id.
    pub fn room_stats(conn: &Connection) -> Result<Vec<RoomStats>> {
        let mut stmt = conn.prepare(
            "SELECT room_id, COUNT(*), MIN(origin_server_ts), MAX(origin_server_ts)
             FROM events GROUP BY room_id ORDER BY room_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RoomStats {
                    room_id: row.get(0)?,
                    count: row.get(1)?,
                    oldest_ts: row.get(2)?,
                    newest_ts: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Move a row to a new id and set its delivery status.
    pub fn rename(conn: &Connection, from: &str, to: &str, status: LocalStatus) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE events SET event_id = ?2, local_status = ?3 WHERE event_id = ?1",
            params![from, to, status.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Overwrite the delivery status of one row.
    pub fn set_local_status(conn: &Connection, event_id: &str, status: LocalStatus) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE events SET local_status = ?2 WHERE event_id = ?1",
            params![event_id, status.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Delete a single row.
    pub fn delete(conn: &Connection, event_id: &str) -> Result<bool> {
        let changed = conn.execute("DELETE FROM events WHERE event_id = ?1", params![event_id])?;
        Ok(changed > 0)
    }

    /// Delete every event in a room. Returns the count deleted.
    pub fn delete_by_room(conn: &Connection, room_id: &str) -> Result<usize> {
        let changed = conn.execute("DELETE FROM events WHERE room_id = ?1", params![room_id])?;
        Ok(changed)
    }
}
