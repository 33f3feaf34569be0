//! High-level [`EventCacheStore`] API.
//!
//! Wraps the connection pool and the event repository. Every write is a
//! single upsert-shaped statement or one short transaction, so the store can
//! be called repeatedly with the same logical event (at-least-once delivery)
//! and converge on one row per `event_id`.

use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::errors::{Result, StoreError};
use crate::record::{EventRecord, LocalStatus, local_echo_id, merge_by_presence};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::sqlite::migrations;
use crate::sqlite::repositories::event::EventRepo;
use crate::sqlite::row_types::EventRow;

pub use crate::sqlite::repositories::event::RoomStats as RoomSummary;

/// Result of [`EventCacheStore::persist_event`].
#[derive(Clone, Debug, PartialEq)]
pub struct PersistOutcome {
    /// The record as it now exists in storage. For a duplicate this is the
    /// stored copy merged with any fields only the caller had.
    pub record: EventRecord,
    /// Whether a new row was written.
    pub inserted: bool,
}

/// A record together with its arrival sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEvent {
    /// Store-assigned arrival order.
    pub seq: i64,
    /// The event.
    pub record: EventRecord,
}

impl StoredEvent {
    /// Keyset position just past this event.
    pub fn position(&self) -> PagePosition {
        PagePosition {
            origin_server_ts: self.record.origin_server_ts,
            seq: self.seq,
        }
    }
}

/// Keyset position within a room's newest-first ordering.
///
/// Orders by timestamp, then sequence, so "older" compares as "less".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PagePosition {
    /// Timestamp of the last event already returned.
    pub origin_server_ts: i64,
    /// Sequence of the last event already returned.
    pub seq: i64,
}

impl PagePosition {
    /// Position that includes every event at `ts` or older.
    pub fn through(ts: i64) -> Self {
        Self {
            origin_server_ts: ts,
            seq: i64::MAX,
        }
    }

    /// Position that includes only events strictly older than `ts`.
    pub fn below(ts: i64) -> Self {
        Self {
            origin_server_ts: ts,
            seq: i64::MIN,
        }
    }
}

/// Durable event cache.
///
/// Cheap to clone: clones share the same pool.
#[derive(Clone)]
pub struct EventCacheStore {
    pool: ConnectionPool,
}

impl EventCacheStore {
    /// Wrap a pool and bring its schema up to date.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let applied = migrations::run_migrations(&conn)?;
        if applied > 0 {
            debug!(applied, "event cache schema migrated");
        }
        drop(conn);
        Ok(Self { pool })
    }

    /// Open (or create) a file-backed cache.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        let pool = connection::new_file(path, config)?;
        debug!(path = %path.display(), "event cache opened");
        Self::new(pool)
    }

    /// Open a private in-memory cache.
    pub fn in_memory() -> Result<Self> {
        Self::new(connection::new_in_memory(&ConnectionConfig::default())?)
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Applied schema version.
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        migrations::current_version(&conn)
    }

    /// Look up one event.
    pub fn get_event(&self, event_id: &str) -> Result<Option<EventRecord>> {
        let conn = self.conn()?;
        EventRepo::get_by_id(&conn, event_id)?
            .map(EventRow::into_record)
            .transpose()
    }

    /// Persist one record.
    ///
    /// A new `event_id` is inserted. An existing one is left as stored except
    /// that columns it lacks are filled from `record`; the returned outcome
    /// carries the merged copy, which callers should use in place of their own.
    #[instrument(skip_all, fields(event_id = %record.event_id, room_id = %record.room_id))]
    pub fn persist_event(&self, record: EventRecord) -> Result<PersistOutcome> {
        if record.event_id.is_empty() {
            return Err(StoreError::InvalidEvent("empty event_id".into()));
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let outcome = if EventRepo::insert_or_ignore(&tx, &record)? {
            PersistOutcome {
                record,
                inserted: true,
            }
        } else {
            let stored = EventRepo::get_by_id(&tx, &record.event_id)?
                .ok_or_else(|| StoreError::InvalidEvent(format!("{} vanished", record.event_id)))?
                .into_record()?;
            let merged = merge_by_presence(&stored, record);
            if merged != stored {
                EventRepo::fill_absent(&tx, &merged)?;
            }
            debug!("duplicate event merged");
            PersistOutcome {
                record: merged,
                inserted: false,
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Persist a batch. A record that fails to persist is logged and skipped;
    /// the rest of the batch still proceeds. Returns the merged records that
    /// made it to storage, in input order.
    pub fn store_events(&self, records: Vec<EventRecord>) -> Vec<EventRecord> {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let event_id = record.event_id.clone();
            match self.persist_event(record) {
                Ok(outcome) => stored.push(outcome.record),
                Err(e) => warn!(%event_id, error = %e, "failed to persist event, skipping"),
            }
        }
        stored
    }

    /// Up to `limit` events in `room_id` strictly older than `before_ts`,
    /// newest first. One statement, so the page is read-consistent.
    pub fn query_page(&self, room_id: &str, before_ts: i64, limit: u32) -> Result<Vec<EventRecord>> {
        let conn = self.conn()?;
        EventRepo::page_before_ts(&conn, room_id, before_ts, limit)?
            .into_iter()
            .map(EventRow::into_record)
            .collect()
    }

    /// Keyset page after `position` (or from the newest event when `None`).
    pub fn query_before(
        &self,
        room_id: &str,
        position: Option<PagePosition>,
        limit: u32,
    ) -> Result<Vec<StoredEvent>> {
        let (ts, seq) = position.map_or((i64::MAX, i64::MAX), |p| (p.origin_server_ts, p.seq));
        let conn = self.conn()?;
        EventRepo::page_before_position(&conn, room_id, ts, seq, limit)?
            .into_iter()
            .map(|row| {
                let seq = row.seq;
                row.into_record().map(|record| StoredEvent { seq, record })
            })
            .collect()
    }

    /// Newest stored timestamp in a room.
    pub fn newest_ts(&self, room_id: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        EventRepo::newest_ts(&conn, room_id)
    }

    /// Oldest stored timestamp in a room.
    pub fn oldest_ts(&self, room_id: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        EventRepo::oldest_ts(&conn, room_id)
    }

    /// Number of stored events in a room.
    pub fn count(&self, room_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        EventRepo::count_by_room(&conn, room_id)
    }

    /// Per-room counts and time span.
    pub fn room_summaries(&self) -> Result<Vec<RoomSummary>> {
        let conn = self.conn()?;
        EventRepo::room_stats(&conn)
    }

    /// Rooms with at least one stored event.
    pub fn room_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .room_summaries()?
            .into_iter()
            .map(|summary| summary.room_id)
            .collect())
    }

    /// Latest record in `room_id` carrying `txn_id`.
    pub fn find_by_txn_id(&self, room_id: &str, txn_id: &str) -> Result<Option<EventRecord>> {
        let conn = self.conn()?;
        EventRepo::get_by_txn_id(&conn, room_id, txn_id)?
            .map(EventRow::into_record)
            .transpose()
    }

    /// Swap a local echo for its confirmed id.
    ///
    /// If the confirmed event is not stored yet, the echo row is moved to the
    /// real id. If it is (the remote copy arrived first), the echo's extra
    /// fields are folded into it and the echo row is removed, so the room
    /// never holds both. Either way the result is marked
    /// [`LocalStatus::Sent`]. Calling again returns the confirmed record.
    #[instrument(skip(self))]
    pub fn confirm_local_echo(
        &self,
        room_id: &str,
        txn_id: &str,
        event_id: &str,
    ) -> Result<Option<EventRecord>> {
        let echo_id = local_echo_id(room_id, txn_id);
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let echo = EventRepo::get_by_id(&tx, &echo_id)?
            .map(EventRow::into_record)
            .transpose()?;
        let real = EventRepo::get_by_id(&tx, event_id)?
            .map(EventRow::into_record)
            .transpose()?;

        let confirmed = match (echo, real) {
            (Some(echo), None) => {
                let _ = EventRepo::rename(&tx, &echo_id, event_id, LocalStatus::Sent)?;
                Some(EventRecord {
                    event_id: event_id.to_owned(),
                    local_status: Some(LocalStatus::Sent),
                    ..echo
                })
            }
            (Some(echo), Some(real)) => {
                let merged = merge_by_presence(&real, echo);
                EventRepo::fill_absent(&tx, &merged)?;
                let _ = EventRepo::set_local_status(&tx, event_id, LocalStatus::Sent)?;
                let _ = EventRepo::delete(&tx, &echo_id)?;
                Some(EventRecord {
                    local_status: Some(LocalStatus::Sent),
                    ..merged
                })
            }
            (None, Some(real)) if real.local_status == Some(LocalStatus::Pending) => {
                let _ = EventRepo::set_local_status(&tx, event_id, LocalStatus::Sent)?;
                Some(EventRecord {
                    local_status: Some(LocalStatus::Sent),
                    ..real
                })
            }
            (None, real) => real,
        };

        tx.commit()?;
        Ok(confirmed)
    }

    /// Flag a pending echo as failed. Returns the updated record.
    pub fn mark_local_failed(&self, room_id: &str, txn_id: &str) -> Result<Option<EventRecord>> {
        let echo_id = local_echo_id(room_id, txn_id);
        let conn = self.conn()?;
        let Some(echo) = EventRepo::get_by_id(&conn, &echo_id)?
            .map(EventRow::into_record)
            .transpose()?
        else {
            return Ok(None);
        };
        if echo.local_status != Some(LocalStatus::Pending) {
            return Ok(Some(echo));
        }
        let _ = EventRepo::set_local_status(&conn, &echo_id, LocalStatus::Failed)?;
        Ok(Some(EventRecord {
            local_status: Some(LocalStatus::Failed),
            ..echo
        }))
    }

    /// Drop every event of a room. Returns how many rows were removed.
    pub fn delete_room(&self, room_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = EventRepo::delete_by_room(&conn, room_id)?;
        debug!(room_id, deleted, "room dropped from cache");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn event(id: &str, ts: i64, body: &str) -> EventRecord {
        EventRecord {
            event_id: id.into(),
            room_id: "!r1".into(),
            event_type: "m.room.message".into(),
            content: json!({"msgtype": "m.text", "body": body}),
            origin_server_ts: ts,
            sender: "@alice:x".into(),
            state_key: None,
            txn_id: None,
            membership: None,
            unsigned: None,
            redacts: None,
            local_status: None,
        }
    }

    #[test]
    fn persist_twice_keeps_first_content() {
        let store = EventCacheStore::in_memory().unwrap();
        let first = store.persist_event(event("$a", 1, "first")).unwrap();
        assert!(first.inserted);

        let second = store.persist_event(event("$a", 1, "second")).unwrap();
        assert!(!second.inserted);
        assert_eq!(second.record.content["body"], "first");

        let stored = store.get_event("$a").unwrap().unwrap();
        assert_eq!(stored.content["body"], "first");
        assert_eq!(store.count("!r1").unwrap(), 1);
    }

    #[test]
    fn duplicate_fills_fields_the_stub_lacked() {
        let store = EventCacheStore::in_memory().unwrap();
        let _ = store.persist_event(event("$a", 1, "hi")).unwrap();

        let mut enriched = event("$a", 1, "ignored");
        enriched.unsigned = Some(json!({"age": 30}));
        let outcome = store.persist_event(enriched).unwrap();
        assert_eq!(outcome.record.unsigned, Some(json!({"age": 30})));
        assert_eq!(outcome.record.content["body"], "hi");

        let stored = store.get_event("$a").unwrap().unwrap();
        assert_eq!(stored, outcome.record);
    }

    #[test]
    fn stub_content_is_enriched_in_storage() {
        let store = EventCacheStore::in_memory().unwrap();
        let mut stub = event("$s", 1, "");
        stub.content = serde_json::Value::Null;
        let _ = store.persist_event(stub).unwrap();

        let outcome = store.persist_event(event("$s", 1, "late")).unwrap();
        assert!(!outcome.inserted);
        assert_eq!(outcome.record.content["body"], "late");
        assert_eq!(store.get_event("$s").unwrap().unwrap(), outcome.record);
    }

    #[test]
    fn empty_event_id_is_rejected() {
        let store = EventCacheStore::in_memory().unwrap();
        assert_matches!(
            store.persist_event(event("", 1, "x")),
            Err(StoreError::InvalidEvent(_))
        );
    }

    #[test]
    fn store_events_skips_failures_and_continues() {
        let store = EventCacheStore::in_memory().unwrap();
        let stored = store.store_events(vec![
            event("$1", 1, "a"),
            event("", 2, "broken"),
            event("$3", 3, "c"),
        ]);
        assert_eq!(stored.len(), 2);
        assert_eq!(store.count("!r1").unwrap(), 2);
    }

    #[test]
    fn query_page_newest_first() {
        let store = EventCacheStore::in_memory().unwrap();
        let _ = store.store_events((1..=5).map(|i| event(&format!("$e{i}"), i * 10, "x")).collect());
        let page = store.query_page("!r1", 45, 2).unwrap();
        let ids: Vec<&str> = page.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["$e4", "$e3"]);
        assert!(store.query_page("!r1", 10, 5).unwrap().is_empty());
        assert!(store.query_page("!other", i64::MAX, 5).unwrap().is_empty());
    }

    #[test]
    fn query_before_walks_whole_room() {
        let store = EventCacheStore::in_memory().unwrap();
        let _ = store.store_events((0..7).map(|i| event(&format!("$e{i}"), i % 3, "x")).collect());

        let mut position = None;
        let mut seen = Vec::new();
        loop {
            let page = store.query_before("!r1", position, 3).unwrap();
            let Some(last) = page.last() else { break };
            position = Some(last.position());
            seen.extend(page.into_iter().map(|s| s.record.event_id));
        }
        assert_eq!(seen.len(), 7);
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 7);
    }

    #[test]
    fn confirm_echo_renames_when_remote_not_seen() {
        let store = EventCacheStore::in_memory().unwrap();
        let echo = EventRecord::local_echo("!r1", "t1", "m.room.message", json!({"body": "yo"}), "@me:x");
        let _ = store.persist_event(echo).unwrap();

        let confirmed = store.confirm_local_echo("!r1", "t1", "$real").unwrap().unwrap();
        assert_eq!(confirmed.event_id, "$real");
        assert_eq!(confirmed.local_status, Some(LocalStatus::Sent));
        assert!(store.get_event("~!r1:t1").unwrap().is_none());

        let page = store.query_page("!r1", i64::MAX, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].event_id, "$real");
    }

    #[test]
    fn confirm_echo_folds_into_remote_copy() {
        let store = EventCacheStore::in_memory().unwrap();
        let echo = EventRecord::local_echo("!r1", "t2", "m.room.message", json!({"body": "yo"}), "@me:x");
        let _ = store.persist_event(echo).unwrap();
        let mut remote = event("$real", 500, "yo");
        remote.sender = "@me:x".into();
        let _ = store.persist_event(remote).unwrap();

        let confirmed = store.confirm_local_echo("!r1", "t2", "$real").unwrap().unwrap();
        assert_eq!(confirmed.event_id, "$real");
        assert_eq!(confirmed.origin_server_ts, 500);
        assert_eq!(confirmed.txn_id.as_deref(), Some("t2"));
        assert_eq!(confirmed.local_status, Some(LocalStatus::Sent));

        let page = store.query_page("!r1", i64::MAX, 10).unwrap();
        assert_eq!(page.len(), 1, "echo and confirmed copy must not both remain");
    }

    #[test]
    fn confirm_echo_is_idempotent() {
        let store = EventCacheStore::in_memory().unwrap();
        let echo = EventRecord::local_echo("!r1", "t3", "m.room.message", json!({}), "@me:x");
        let _ = store.persist_event(echo).unwrap();
        let once = store.confirm_local_echo("!r1", "t3", "$r3").unwrap();
        let twice = store.confirm_local_echo("!r1", "t3", "$r3").unwrap();
        assert_eq!(once, twice);
        assert_eq!(store.count("!r1").unwrap(), 1);
        assert!(store.confirm_local_echo("!r1", "nope", "$zzz").unwrap().is_none());
    }

    #[test]
    fn mark_failed_only_affects_pending() {
        let store = EventCacheStore::in_memory().unwrap();
        let echo = EventRecord::local_echo("!r1", "t4", "m.room.message", json!({}), "@me:x");
        let _ = store.persist_event(echo).unwrap();
        let failed = store.mark_local_failed("!r1", "t4").unwrap().unwrap();
        assert_eq!(failed.local_status, Some(LocalStatus::Failed));
        assert_eq!(
            store.find_by_txn_id("!r1", "t4").unwrap().unwrap().local_status,
            Some(LocalStatus::Failed)
        );
        assert!(store.mark_local_failed("!r1", "missing").unwrap().is_none());
    }

    #[test]
    fn delete_room_drops_everything() {
        let store = EventCacheStore::in_memory().unwrap();
        let _ = store.store_events(vec![event("$1", 1, "a"), event("$2", 2, "b")]);
        assert_eq!(store.delete_room("!r1").unwrap(), 2);
        assert_eq!(store.newest_ts("!r1").unwrap(), None);
        assert!(store.room_summaries().unwrap().is_empty());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let store = EventCacheStore::open(&path, &ConnectionConfig::default()).unwrap();
            let _ = store.persist_event(event("$keep", 7, "durable")).unwrap();
        }
        let store = EventCacheStore::open(&path, &ConnectionConfig::default()).unwrap();
        assert_eq!(store.schema_version().unwrap(), migrations::latest_version());
        assert_eq!(store.get_event("$keep").unwrap().unwrap().content["body"], "durable");
    }
}
