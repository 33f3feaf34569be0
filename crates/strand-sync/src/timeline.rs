//! In-memory live timelines.
//!
//! Each room keeps the events currently shown, oldest at the front. Live
//! ingestion appends at the back; backfill only ever prepends, and only
//! events no newer than the current front.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use strand_store::EventRecord;

/// One room's live window.
#[derive(Debug, Default)]
pub struct RoomTimeline {
    events: VecDeque<EventRecord>,
    ids: HashSet<String>,
    back_token: Option<String>,
}

impl RoomTimeline {
    /// Timestamp of the front (oldest) event.
    pub fn oldest_ts(&self) -> Option<i64> {
        self.events.front().map(|e| e.origin_server_ts)
    }

    /// Whether `event_id` is shown.
    pub fn contains(&self, event_id: &str) -> bool {
        self.ids.contains(event_id)
    }

    /// Number of events shown.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is shown.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter()
    }

    /// Append at the live edge. Returns `false` if already shown.
    pub fn push_back(&mut self, record: EventRecord) -> bool {
        if !self.ids.insert(record.event_id.clone()) {
            return false;
        }
        self.events.push_back(record);
        true
    }

    /// Prepend the part of `page` not newer than the current front and not
    /// already shown. Events sharing the front's timestamp count as older.
    /// `page` may be in any order. Returns how many were added.
    pub fn prepend_older(&mut self, page: Vec<EventRecord>) -> usize {
        let start = self.oldest_ts();
        let mut older: Vec<EventRecord> = page
            .into_iter()
            .filter(|e| start.is_none_or(|s| e.origin_server_ts <= s))
            .collect();
        older.sort_by(|a, b| b.origin_server_ts.cmp(&a.origin_server_ts));

        let mut added = 0;
        for record in older {
            if self.ids.insert(record.event_id.clone()) {
                self.events.push_front(record);
                added += 1;
            }
        }
        added
    }

    /// Swap the event shown as `old_id` for `record`, in place.
    ///
    /// If `record`'s id is already shown elsewhere, that entry is updated and
    /// the `old_id` entry dropped. Returns `false` if `old_id` is not shown.
    pub fn replace(&mut self, old_id: &str, record: EventRecord) -> bool {
        let Some(index) = self.events.iter().position(|e| e.event_id == old_id) else {
            return false;
        };

        if old_id != record.event_id && self.ids.contains(&record.event_id) {
            let _ = self.events.remove(index);
            let _ = self.ids.remove(old_id);
            if let Some(existing) = self.events.iter_mut().find(|e| e.event_id == record.event_id) {
                *existing = record;
            }
            return true;
        }

        let _ = self.ids.remove(old_id);
        let _ = self.ids.insert(record.event_id.clone());
        self.events[index] = record;
        true
    }

    /// Back-pagination token of the live window.
    pub fn back_token(&self) -> Option<&str> {
        self.back_token.as_deref()
    }
}

/// Live timelines for every room, shared by backfill and ingestion.
#[derive(Clone, Debug, Default)]
pub struct LiveTimelines {
    rooms: Arc<DashMap<String, RoomTimeline>>,
}

impl LiveTimelines {
    /// No rooms yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against `room_id`'s timeline, creating it if needed.
    pub fn with_room<R>(&self, room_id: &str, f: impl FnOnce(&mut RoomTimeline) -> R) -> R {
        let mut room = self.rooms.entry(room_id.to_owned()).or_default();
        f(room.value_mut())
    }

    /// Oldest shown timestamp.
    pub fn oldest_ts(&self, room_id: &str) -> Option<i64> {
        self.rooms.get(room_id).and_then(|r| r.oldest_ts())
    }

    /// Number of events shown.
    pub fn len(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |r| r.len())
    }

    /// Copy of a room's events, oldest first.
    pub fn snapshot(&self, room_id: &str) -> Vec<EventRecord> {
        self.rooms
            .get(room_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Back-pagination token recorded for a room.
    pub fn back_token(&self, room_id: &str) -> Option<String> {
        self.rooms
            .get(room_id)
            .and_then(|r| r.back_token().map(str::to_owned))
    }

    /// Record the live window's back-pagination token.
    pub fn set_back_token(&self, room_id: &str, token: String) {
        self.with_room(room_id, |r| r.back_token = Some(token));
    }

    /// Drop a room.
    pub fn remove(&self, room_id: &str) {
        let _ = self.rooms.remove(room_id);
    }
}
