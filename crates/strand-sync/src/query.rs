//! Paged history reads for one room.

use strand_store::{PagePosition, StoredEvent};
use tracing::{debug, warn};

use crate::backfill::{BackfillEngine, PageSource};
use crate::message::ChatMessage;

/// Reads a room's history page by page, newest first.
///
/// Keeps its own read position, independent of the engine's cursor. When the
/// store runs short it asks the engine to backfill and reads again.
pub struct MessageQuery {
    engine: BackfillEngine,
    room_id: String,
    position: Option<PagePosition>,
}

impl MessageQuery {
    /// Start at the newest stored message of `room_id`.
    pub fn new(engine: BackfillEngine, room_id: impl Into<String>) -> Self {
        Self {
            engine,
            room_id: room_id.into(),
            position: None,
        }
    }

    /// Room being read.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Restart from the newest message.
    pub fn reset(&mut self) {
        self.position = None;
    }

    /// Next page of up to `limit` messages, newest first.
    ///
    /// Never fails: store and backfill errors are logged and yield a short or
    /// empty page.
    pub async fn load_more_messages(&mut self, limit: u32) -> Vec<ChatMessage> {
        if limit == 0 {
            return Vec::new();
        }

        let mut page = self.read(limit);
        while page.len() < limit as usize {
            match self.engine.scrollback(&self.room_id, limit).await {
                Ok(outcome) => {
                    debug!(room_id = %self.room_id, added = outcome.added, source = ?outcome.source, "backfilled for query");
                    if outcome.source != PageSource::None {
                        page = self.read(limit);
                    }
                    if outcome.exhausted || outcome.source == PageSource::None {
                        break;
                    }
                }
                Err(e) => {
                    warn!(room_id = %self.room_id, error = %e, "backfill failed, returning local page");
                    break;
                }
            }
        }

        if let Some(last) = page.last() {
            self.position = Some(last.position());
        }
        page.iter()
            .map(|stored| ChatMessage::from_record(&stored.record))
            .collect()
    }

    fn read(&self, limit: u32) -> Vec<StoredEvent> {
        match self
            .engine
            .store()
            .query_before(&self.room_id, self.position, limit)
        {
            Ok(page) => page,
            Err(e) => {
                warn!(room_id = %self.room_id, error = %e, "failed to read stored messages");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::BackfillConfig;
    use crate::errors::RemoteError;
    use crate::remote::{HistoryPage, RemoteEventSource};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use strand_store::{EventCacheStore, EventRecord, ProtocolEvent};

    const ROOM: &str = "!room:x";

    fn protocol(i: i64) -> ProtocolEvent {
        ProtocolEvent {
            event_id: format!("$e{i}"),
            event_type: "m.room.message".into(),
            content: json!({"msgtype": "m.text", "body": format!("m{i}")}),
            origin_server_ts: i * 10,
            sender: "@bob:x".into(),
            state_key: None,
            unsigned: None,
            redacts: None,
        }
    }

    /// Remote with events `1..=total`, offset tokens.
    struct Remote {
        total: i64,
        calls: Mutex<u32>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteEventSource for Remote {
        async fn paginate_backwards(
            &self,
            _room_id: &str,
            from: Option<&str>,
            limit: u32,
        ) -> Result<HistoryPage, RemoteError> {
            *self.calls.lock() += 1;
            if self.fail {
                return Err(RemoteError::Unavailable("offline".into()));
            }
            let start = from.map_or(self.total, |t| t.parse().unwrap_or(0));
            let stop = (start - i64::from(limit)).max(0);
            Ok(HistoryPage {
                events: (stop + 1..=start).rev().map(protocol).collect(),
                end: (stop > 0).then(|| stop.to_string()),
            })
        }
    }

    fn query(total: i64, fail: bool, stored: i64) -> (MessageQuery, Arc<Remote>) {
        let remote = Arc::new(Remote {
            total,
            calls: Mutex::new(0),
            fail,
        });
        let store = EventCacheStore::in_memory().unwrap();
        let records: Vec<EventRecord> = (total - stored + 1..=total)
            .map(|i| protocol(i).into_record(ROOM))
            .collect();
        let _ = store.store_events(records);
        let engine = BackfillEngine::new(store, remote.clone(), BackfillConfig::default());
        (MessageQuery::new(engine, ROOM), remote)
    }

    fn bodies(page: &[ChatMessage]) -> Vec<String> {
        page.iter().map(|m| m.text.clone()).collect()
    }

    #[tokio::test]
    async fn local_pages_newest_first() {
        let (mut q, remote) = query(10, false, 10);
        let first = q.load_more_messages(3).await;
        assert_eq!(bodies(&first), vec!["m10", "m9", "m8"]);
        let second = q.load_more_messages(3).await;
        assert_eq!(bodies(&second), vec!["m7", "m6", "m5"]);
        assert_eq!(*remote.calls.lock(), 0);
    }

    #[tokio::test]
    async fn short_store_falls_back_to_backfill() {
        let (mut q, remote) = query(20, false, 4);
        let page = q.load_more_messages(10).await;
        assert_eq!(page.len(), 10);
        assert_eq!(page[0].text, "m20");
        assert_eq!(page[9].text, "m11");
        assert!(*remote.calls.lock() >= 1);

        let rest = q.load_more_messages(20).await;
        assert_eq!(rest.len(), 10);
        assert_eq!(rest.last().unwrap().text, "m1");
        assert!(q.load_more_messages(5).await.is_empty());
    }

    #[tokio::test]
    async fn failure_returns_local_rows_only() {
        let (mut q, _remote) = query(10, true, 2);
        let page = q.load_more_messages(5).await;
        assert_eq!(bodies(&page), vec!["m10", "m9"]);
    }

    #[tokio::test]
    async fn reset_restarts_from_newest() {
        let (mut q, _remote) = query(5, false, 5);
        let _ = q.load_more_messages(2).await;
        q.reset();
        let again = q.load_more_messages(1).await;
        assert_eq!(bodies(&again), vec!["m5"]);
    }

    #[tokio::test]
    async fn zero_limit_is_empty() {
        let (mut q, remote) = query(5, false, 0);
        assert!(q.load_more_messages(0).await.is_empty());
        assert_eq!(*remote.calls.lock(), 0);
    }
}
