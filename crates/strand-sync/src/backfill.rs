//! Backfill engine.
//!
//! Drives scrollback for each room: read older events from the local store
//! first, fall back to the remote source once the store has nothing older,
//! persist what comes back, prepend it to the live timeline and move the
//! cursor. Concurrent requests for one room share a single in-flight
//! operation; after a transient failure the next attempt waits out the
//! cooldown. A rejected request is not retried on a timer.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use strand_settings::BackfillSettings;
use strand_store::{EventCacheStore, EventRecord, StoredEvent};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::cursor::{BackToken, CursorTracker, ScrollbackCursor};
use crate::emitter::{TimelineEmitter, TimelineNotification};
use crate::errors::SyncError;
use crate::remote::RemoteEventSource;
use crate::timeline::LiveTimelines;

/// Backfill tuning.
#[derive(Clone, Debug)]
pub struct BackfillConfig {
    /// Minimum gap between a failed attempt and the next one.
    pub retry_cooldown: Duration,
    /// Page size used by [`BackfillEngine::preload_to_cursor`].
    pub page_size: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            retry_cooldown: Duration::from_millis(3000),
            page_size: 50,
        }
    }
}

impl From<&BackfillSettings> for BackfillConfig {
    fn from(settings: &BackfillSettings) -> Self {
        Self {
            retry_cooldown: Duration::from_millis(settings.retry_cooldown_ms),
            page_size: settings.page_size,
        }
    }
}

/// Where a scrollback page came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageSource {
    /// Read back from the local store.
    Local,
    /// Fetched from the remote source.
    Remote,
    /// Nothing was read.
    None,
}

/// Result of one scrollback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScrollbackOutcome {
    /// Room paged.
    pub room_id: String,
    /// Events prepended to the live timeline.
    pub added: usize,
    /// Where the page came from.
    pub source: PageSource,
    /// Whether the room's full history is now resident.
    pub exhausted: bool,
}

impl ScrollbackOutcome {
    fn exhausted(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_owned(),
            added: 0,
            source: PageSource::None,
            exhausted: true,
        }
    }
}

type SharedScrollback = Shared<BoxFuture<'static, Result<ScrollbackOutcome, SyncError>>>;

/// Ongoing scrollback state for one room.
enum Descriptor {
    InFlight(SharedScrollback),
    FailedAt(Instant),
}

struct Inner {
    store: EventCacheStore,
    remote: Arc<dyn RemoteEventSource>,
    timelines: LiveTimelines,
    cursors: CursorTracker,
    emitter: Arc<TimelineEmitter>,
    config: BackfillConfig,
    ongoing: DashMap<String, Descriptor>,
}

/// Per-room scrollback with single-flight and retry cooldown.
///
/// Cheap to clone: clones share all state.
#[derive(Clone)]
pub struct BackfillEngine {
    inner: Arc<Inner>,
}

impl BackfillEngine {
    /// Create an engine with fresh live timelines and notification channel.
    pub fn new(
        store: EventCacheStore,
        remote: Arc<dyn RemoteEventSource>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                timelines: LiveTimelines::new(),
                cursors: CursorTracker::new(),
                emitter: Arc::new(TimelineEmitter::new()),
                config,
                ongoing: DashMap::new(),
            }),
        }
    }

    /// Backing store.
    pub fn store(&self) -> &EventCacheStore {
        &self.inner.store
    }

    /// Live timelines shared with ingestion.
    pub fn timelines(&self) -> &LiveTimelines {
        &self.inner.timelines
    }

    /// Notification channel.
    pub fn emitter(&self) -> &Arc<TimelineEmitter> {
        &self.inner.emitter
    }

    /// Engine settings.
    pub fn config(&self) -> &BackfillConfig {
        &self.inner.config
    }

    /// Cursor for `room_id`, `None` until the first scrollback.
    pub fn cursor(&self, room_id: &str) -> Option<ScrollbackCursor> {
        self.inner.cursors.get(room_id)
    }

    /// Record the live window's back-pagination token. A cursor that has not
    /// paged the remote yet adopts it.
    pub fn set_back_token(&self, room_id: &str, token: String) {
        self.inner
            .cursors
            .update(room_id, |c| c.adopt_token(BackToken::Token(token.clone())));
        self.inner.timelines.set_back_token(room_id, token);
    }

    /// Load up to `limit` older events into `room_id`'s live timeline.
    ///
    /// Concurrent calls for the same room join one operation and observe the
    /// same result. A call made within the cooldown after a transient failure
    /// waits out the remainder before fetching. Once the room is exhausted this returns
    /// immediately without touching the remote.
    #[instrument(skip(self))]
    pub async fn scrollback(&self, room_id: &str, limit: u32) -> Result<ScrollbackOutcome, SyncError> {
        if self.inner.cursors.is_exhausted(room_id) {
            debug!("history exhausted, nothing to do");
            return Ok(ScrollbackOutcome::exhausted(room_id));
        }
        self.join_or_start(room_id, limit).await
    }

    fn join_or_start(&self, room_id: &str, limit: u32) -> SharedScrollback {
        match self.inner.ongoing.entry(room_id.to_owned()) {
            Entry::Occupied(mut entry) => {
                let failed_at = match entry.get() {
                    Descriptor::InFlight(shared) => {
                        debug!("joining in-flight scrollback");
                        return shared.clone();
                    }
                    Descriptor::FailedAt(at) => *at,
                };
                let wait = self.inner.config.retry_cooldown.saturating_sub(failed_at.elapsed());
                let shared = self.start(room_id, limit, wait);
                let _ = entry.insert(Descriptor::InFlight(shared.clone()));
                shared
            }
            Entry::Vacant(entry) => {
                let shared = self.start(room_id, limit, Duration::ZERO);
                let _ = entry.insert(Descriptor::InFlight(shared.clone()));
                shared
            }
        }
    }

    fn start(&self, room_id: &str, limit: u32, wait: Duration) -> SharedScrollback {
        let inner = Arc::clone(&self.inner);
        let room_id = room_id.to_owned();
        async move {
            if !wait.is_zero() {
                debug!(%room_id, wait_ms = wait.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(wait).await;
            }
            let result = inner.run_scrollback(&room_id, limit).await;
            inner.finish(&room_id, &result);
            result
        }
        .boxed()
        .shared()
    }

    /// Scroll back until the live timeline reaches the newest event persisted
    /// before this call, or history is exhausted. Returns events added.
    #[instrument(skip(self))]
    pub async fn preload_to_cursor(&self, room_id: &str) -> Result<usize, SyncError> {
        let target = self.inner.store.newest_ts(room_id)?;
        let page_size = self.inner.config.page_size;
        let mut added = 0;

        loop {
            let reached = target
                .zip(self.inner.timelines.oldest_ts(room_id))
                .is_some_and(|(target, oldest)| oldest <= target);
            if reached {
                break;
            }
            let outcome = self.scrollback(room_id, page_size).await?;
            added += outcome.added;
            if outcome.exhausted {
                break;
            }
        }

        debug!(added, "preload complete");
        Ok(added)
    }

    /// Forget a room: cursor, ongoing state, live timeline and stored events.
    #[instrument(skip(self))]
    pub fn forget_room(&self, room_id: &str) -> Result<usize, SyncError> {
        self.inner.cursors.reset(room_id);
        let _ = self.inner.ongoing.remove(room_id);
        self.inner.timelines.remove(room_id);
        let deleted = self.inner.store.delete_room(room_id)?;
        info!(deleted, "room forgotten");
        Ok(deleted)
    }
}

impl Inner {
    /// Cursor for `room_id`, initializing it from the live timeline or the
    /// store on first use.
    fn cursor_for(&self, room_id: &str) -> Result<ScrollbackCursor, SyncError> {
        if let Some(cursor) = self.cursors.get(room_id) {
            return Ok(cursor);
        }

        let token = self
            .timelines
            .back_token(room_id)
            .map_or(BackToken::FromLiveEdge, BackToken::Token);
        let initial = match self.timelines.oldest_ts(room_id) {
            Some(ts) => ScrollbackCursor::starting_at(ts, token),
            None => match self.store.newest_ts(room_id)? {
                Some(ts) => ScrollbackCursor::starting_at(ts, token),
                None => ScrollbackCursor::open(token),
            },
        };
        debug!(%room_id, cursor = ?initial, "cursor initialized");
        Ok(self.cursors.get_or_insert(room_id, initial))
    }

    async fn run_scrollback(&self, room_id: &str, limit: u32) -> Result<ScrollbackOutcome, SyncError> {
        let cursor = self.cursor_for(room_id)?;
        let (Some(position), Some(token)) = (cursor.position(), cursor.token().cloned()) else {
            return Ok(ScrollbackOutcome::exhausted(room_id));
        };

        let local = self.store.query_before(room_id, Some(position), limit)?;
        if let Some(oldest) = local.last().map(StoredEvent::position) {
            let records: Vec<EventRecord> = local.into_iter().map(|e| e.record).collect();
            let added = self.timelines.with_room(room_id, |t| t.prepend_older(records));
            self.cursors.update(room_id, |c| c.advance_to(oldest));
            debug!(%room_id, added, "page served from local store");
            return Ok(ScrollbackOutcome {
                room_id: room_id.to_owned(),
                added,
                source: PageSource::Local,
                exhausted: false,
            });
        }

        let from = match token {
            BackToken::End => {
                self.cursors.update(room_id, ScrollbackCursor::exhaust);
                debug!(%room_id, "local store drained at start of room");
                return Ok(ScrollbackOutcome::exhausted(room_id));
            }
            // Without a token the remote can only page from its newest event,
            // so this page overlaps what is already stored. The overlap merges
            // as duplicates and is filtered out of the timeline.
            BackToken::FromLiveEdge => None,
            BackToken::Token(token) => Some(token),
        };

        let page = self
            .remote
            .paginate_backwards(room_id, from.as_deref(), limit)
            .await?;
        let fetched: Vec<EventRecord> = page
            .events
            .into_iter()
            .map(|e| e.into_record(room_id))
            .collect();

        let Some(oldest) = oldest_ts(&fetched) else {
            self.cursors.update(room_id, ScrollbackCursor::exhaust);
            debug!(%room_id, "remote returned an empty page");
            return Ok(ScrollbackOutcome {
                room_id: room_id.to_owned(),
                added: 0,
                source: PageSource::Remote,
                exhausted: true,
            });
        };

        let fetched_count = fetched.len();
        let stored = self.store.store_events(fetched);
        let added = self.timelines.with_room(room_id, |t| t.prepend_older(stored));

        let exhausted = page.end.is_none();
        self.cursors.update(room_id, |c| {
            c.advance(oldest);
            c.set_token(BackToken::from_end(page.end));
            if exhausted {
                c.exhaust();
            }
        });
        debug!(%room_id, fetched = fetched_count, added, exhausted, "page fetched from remote");

        Ok(ScrollbackOutcome {
            room_id: room_id.to_owned(),
            added,
            source: PageSource::Remote,
            exhausted,
        })
    }

    fn finish(&self, room_id: &str, result: &Result<ScrollbackOutcome, SyncError>) {
        match result {
            Ok(outcome) => {
                let _ = self.ongoing.remove(room_id);
                let _ = self.emitter.emit(TimelineNotification::Refreshed {
                    room_id: room_id.to_owned(),
                    added: outcome.added,
                });
            }
            Err(e) if e.is_retryable() => {
                warn!(%room_id, error = %e, category = e.category(), "scrollback failed, cooling down");
                let _ = self
                    .ongoing
                    .insert(room_id.to_owned(), Descriptor::FailedAt(Instant::now()));
            }
            Err(e) => {
                warn!(%room_id, error = %e, category = e.category(), "scrollback rejected");
                let _ = self.ongoing.remove(room_id);
            }
        }
    }
}

fn oldest_ts(events: &[EventRecord]) -> Option<i64> {
    events.iter().map(|e| e.origin_server_ts).min()
}
