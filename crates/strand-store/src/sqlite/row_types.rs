//! Raw database row shape for the `events` table.
//!
//! JSON columns stay as strings here; decoding into [`EventRecord`] happens in
//! [`EventRow::into_record`] so a corrupt column surfaces as
//! [`StoreError::CorruptRow`] rather than a panic inside row mapping.

use serde_json::Value;

use crate::errors::{Result, StoreError};
use crate::record::{EventRecord, LocalStatus};

/// Column list shared by every `SELECT` on `events`, in [`EventRow`] order.
pub const EVENT_COLUMNS: &str = "seq, event_id, room_id, type, content, origin_server_ts, \
     sender, state_key, txn_id, membership, unsigned, redacts, local_status";

/// Raw event row from the `events` table.
#[derive(Clone, Debug)]
pub struct EventRow {
    /// Arrival sequence.
    pub seq: i64,
    /// Event ID.
    pub event_id: String,
    /// Room ID.
    pub room_id: String,
    /// Type tag.
    pub event_type: String,
    /// Content JSON.
    pub content: String,
    /// Server timestamp.
    pub origin_server_ts: i64,
    /// Sender.
    pub sender: String,
    /// State key.
    pub state_key: Option<String>,
    /// Client transaction id.
    pub txn_id: Option<String>,
    /// Membership.
    pub membership: Option<String>,
    /// Unsigned JSON.
    pub unsigned: Option<String>,
    /// Redaction target.
    pub redacts: Option<String>,
    /// Local delivery status.
    pub local_status: Option<String>,
}

impl EventRow {
    /// Map a `rusqlite` row selected with [`EVENT_COLUMNS`].
    pub fn map(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            event_id: row.get(1)?,
            room_id: row.get(2)?,
            event_type: row.get(3)?,
            content: row.get(4)?,
            origin_server_ts: row.get(5)?,
            sender: row.get(6)?,
            state_key: row.get(7)?,
            txn_id: row.get(8)?,
            membership: row.get(9)?,
            unsigned: row.get(10)?,
            redacts: row.get(11)?,
            local_status: row.get(12)?,
        })
    }

    /// Decode JSON columns into a public record.
    pub fn into_record(self) -> Result<EventRecord> {
        let content = parse_json(&self.content, "content")?;
        let unsigned = self
            .unsigned
            .as_deref()
            .map(|raw| parse_json(raw, "unsigned"))
            .transpose()?;
        let local_status = match self.local_status.as_deref() {
            None => None,
            Some(raw) => Some(LocalStatus::parse(raw).ok_or_else(|| StoreError::CorruptRow {
                column: "local_status",
                detail: format!("unknown status: {raw}"),
            })?),
        };

        Ok(EventRecord {
            event_id: self.event_id,
            room_id: self.room_id,
            event_type: self.event_type,
            content,
            origin_server_ts: self.origin_server_ts,
            sender: self.sender,
            state_key: self.state_key,
            txn_id: self.txn_id,
            membership: self.membership,
            unsigned,
            redacts: self.redacts,
            local_status,
        })
    }
}

fn parse_json(raw: &str, column: &'static str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        column,
        detail: format!("invalid JSON: {e}"),
    })
}
