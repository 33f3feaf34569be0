//! Per-room scrollback cursors.
//!
//! A room with no entry is uninitialized; the engine computes its starting
//! point on first use. From there the cursor only moves toward older
//! positions and ends in [`ScrollbackCursor::Exhausted`], which is terminal
//! until the room is reset.

use dashmap::DashMap;
use strand_store::PagePosition;

/// Where the next remote page starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackToken {
    /// No token yet: page from the newest remote event.
    FromLiveEdge,
    /// Opaque continuation token from the remote.
    Token(String),
    /// The remote reported the start of the room.
    End,
}

impl BackToken {
    /// Build from a remote `end` field.
    pub fn from_end(end: Option<String>) -> Self {
        end.map_or(Self::End, Self::Token)
    }
}

/// How far back a room's history is loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScrollbackCursor {
    /// Stored events before `position` are not loaded yet.
    Active {
        /// Keyset position of the oldest loaded event. Timestamp ties are
        /// ordered by store sequence.
        position: PagePosition,
        /// Remote continuation.
        token: BackToken,
    },
    /// Full history is resident.
    Exhausted,
}

impl ScrollbackCursor {
    /// Cursor before which everything counts as older.
    pub fn open(token: BackToken) -> Self {
        Self::starting_at(i64::MAX, token)
    }

    /// Cursor covering every stored event at `ts` or older. Events already
    /// shown at `ts` are skipped by the timeline, not by the cursor.
    pub fn starting_at(ts: i64, token: BackToken) -> Self {
        Self::Active {
            position: PagePosition::through(ts),
            token,
        }
    }

    /// Timestamp bound, `None` once exhausted.
    pub fn before_ts(&self) -> Option<i64> {
        self.position().map(|p| p.origin_server_ts)
    }

    /// Keyset position, `None` once exhausted.
    pub fn position(&self) -> Option<PagePosition> {
        match self {
            Self::Active { position, .. } => Some(*position),
            Self::Exhausted => None,
        }
    }

    /// Current remote token, `None` once exhausted.
    pub fn token(&self) -> Option<&BackToken> {
        match self {
            Self::Active { token, .. } => Some(token),
            Self::Exhausted => None,
        }
    }

    /// Whether full history is resident.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }

    /// Move past a stored page ending at `oldest`. Never moves forward.
    pub fn advance_to(&mut self, oldest: PagePosition) {
        if let Self::Active { position, .. } = self {
            *position = (*position).min(oldest);
        }
    }

    /// Move below `oldest_ts` after a remote page. Never moves forward.
    pub fn advance(&mut self, oldest_ts: i64) {
        self.advance_to(PagePosition::below(oldest_ts));
    }

    /// Replace the remote token.
    pub fn set_token(&mut self, next: BackToken) {
        if let Self::Active { token, .. } = self {
            *token = next;
        }
    }

    /// Adopt `next` only if no remote page has been fetched yet.
    pub fn adopt_token(&mut self, next: BackToken) {
        if let Self::Active { token, .. } = self {
            if *token == BackToken::FromLiveEdge {
                *token = next;
            }
        }
    }

    /// Mark full history resident.
    pub fn exhaust(&mut self) {
        *self = Self::Exhausted;
    }
}

/// Cursor registry keyed by room.
#[derive(Debug, Default)]
pub struct CursorTracker {
    cursors: DashMap<String, ScrollbackCursor>,
}

impl CursorTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor for `room_id`, `None` if uninitialized.
    pub fn get(&self, room_id: &str) -> Option<ScrollbackCursor> {
        self.cursors.get(room_id).map(|c| c.value().clone())
    }

    /// Return the existing cursor, or install `initial`.
    pub fn get_or_insert(&self, room_id: &str, initial: ScrollbackCursor) -> ScrollbackCursor {
        self.cursors
            .entry(room_id.to_owned())
            .or_insert(initial)
            .value()
            .clone()
    }

    /// Mutate an initialized cursor. Uninitialized rooms are left alone.
    pub fn update(&self, room_id: &str, f: impl FnOnce(&mut ScrollbackCursor)) {
        if let Some(mut cursor) = self.cursors.get_mut(room_id) {
            f(cursor.value_mut());
        }
    }

    /// Whether `room_id` has reached the start of its history.
    pub fn is_exhausted(&self, room_id: &str) -> bool {
        self.cursors
            .get(room_id)
            .is_some_and(|c| c.value().is_exhausted())
    }

    /// Return `room_id` to uninitialized.
    pub fn reset(&self, room_id: &str) {
        let _ = self.cursors.remove(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn open_cursor_accepts_everything() {
        let cursor = ScrollbackCursor::open(BackToken::FromLiveEdge);
        assert_eq!(cursor.before_ts(), Some(i64::MAX));
        assert!(!cursor.is_exhausted());
    }

    #[test]
    fn advance_never_moves_forward() {
        let mut cursor = ScrollbackCursor::starting_at(100, BackToken::FromLiveEdge);
        cursor.advance(50);
        cursor.advance(80);
        assert_eq!(cursor.before_ts(), Some(50));
    }

    #[test]
    fn stored_page_advance_breaks_timestamp_ties_by_seq() {
        let mut cursor = ScrollbackCursor::starting_at(100, BackToken::FromLiveEdge);
        cursor.advance_to(PagePosition { origin_server_ts: 100, seq: 7 });
        assert_eq!(cursor.before_ts(), Some(100));
        cursor.advance_to(PagePosition { origin_server_ts: 100, seq: 9 });
        assert_eq!(cursor.position(), Some(PagePosition { origin_server_ts: 100, seq: 7 }));
        cursor.advance(100);
        assert_eq!(cursor.position(), Some(PagePosition::below(100)));
    }

    #[test]
    fn exhausted_is_terminal() {
        let mut cursor = ScrollbackCursor::starting_at(100, BackToken::End);
        cursor.exhaust();
        cursor.advance(1);
        cursor.set_token(BackToken::Token("t".into()));
        assert_eq!(cursor, ScrollbackCursor::Exhausted);
        assert!(cursor.token().is_none());
    }

    #[test]
    fn adopt_token_only_replaces_live_edge() {
        let mut cursor = ScrollbackCursor::open(BackToken::FromLiveEdge);
        cursor.adopt_token(BackToken::Token("a".into()));
        cursor.adopt_token(BackToken::Token("b".into()));
        assert_eq!(cursor.token(), Some(&BackToken::Token("a".into())));
    }

    #[test]
    fn from_end_maps_none_to_end() {
        assert_eq!(BackToken::from_end(None), BackToken::End);
        assert_eq!(
            BackToken::from_end(Some("x".into())),
            BackToken::Token("x".into())
        );
    }

    #[test]
    fn tracker_lifecycle() {
        let tracker = CursorTracker::new();
        assert!(tracker.get("!r").is_none());

        let first = tracker.get_or_insert("!r", ScrollbackCursor::starting_at(10, BackToken::FromLiveEdge));
        let second = tracker.get_or_insert("!r", ScrollbackCursor::open(BackToken::End));
        assert_eq!(first, second);

        tracker.update("!r", ScrollbackCursor::exhaust);
        assert!(tracker.is_exhausted("!r"));

        tracker.reset("!r");
        assert!(tracker.get("!r").is_none());
        assert!(!tracker.is_exhausted("!r"));
    }

    #[test]
    fn update_ignores_uninitialized_room() {
        let tracker = CursorTracker::new();
        tracker.update("!r", |c| c.advance(1));
        assert!(tracker.get("!r").is_none());
    }

    #[derive(Clone, Debug)]
    enum Step {
        Advance(i64),
        AdvanceTo(i64, i64),
        Token(Option<String>),
        Exhaust,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            4 => any::<i64>().prop_map(Step::Advance),
            4 => (any::<i64>(), any::<i64>()).prop_map(|(ts, seq)| Step::AdvanceTo(ts, seq)),
            2 => proptest::option::of("[a-z]{1,4}").prop_map(Step::Token),
            1 => Just(Step::Exhaust),
        ]
    }

    proptest! {
        #[test]
        fn cursor_is_monotonic(start in any::<i64>(), steps in proptest::collection::vec(step(), 0..64)) {
            let mut cursor = ScrollbackCursor::starting_at(start, BackToken::FromLiveEdge);
            let mut previous = cursor.position();
            for step in steps {
                let was_exhausted = cursor.is_exhausted();
                match step {
                    Step::Advance(ts) => cursor.advance(ts),
                    Step::AdvanceTo(ts, seq) => cursor.advance_to(PagePosition { origin_server_ts: ts, seq }),
                    Step::Token(end) => cursor.set_token(BackToken::from_end(end)),
                    Step::Exhaust => cursor.exhaust(),
                }
                let current = cursor.position();
                if was_exhausted {
                    prop_assert!(cursor.is_exhausted());
                }
                if let (Some(prev), Some(now)) = (previous, current) {
                    prop_assert!(now <= prev);
                }
                previous = current;
            }
        }
    }
}
