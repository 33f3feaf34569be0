//! Live ingestion pipeline.
//!
//! Consumes forward events from the live feed: persist, append to the live
//! timeline, notify, and acknowledge with a read receipt. Locally sent events
//! arrive first as pending echoes; each registers a one-shot listener keyed
//! by transaction id that swaps the echo for the confirmed event once the
//! remote reports it.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use strand_store::{EventRecord, local_echo_id, new_txn_id};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::backfill::BackfillEngine;
use crate::emitter::TimelineNotification;
use crate::message::ChatMessage;
use crate::remote::ReceiptSink;

/// Timeline direction an arrival was delivered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// New event at the live edge.
    Forward,
    /// Historical event from back-pagination.
    ToStartOfTimeline,
}

/// One event from the live feed.
#[derive(Clone, Debug, PartialEq)]
pub struct Arrival {
    /// Room the event belongs to.
    pub room_id: String,
    /// The event.
    pub event: EventRecord,
    /// Delivery direction.
    pub direction: Direction,
}

impl Arrival {
    /// Forward arrival.
    pub fn forward(event: EventRecord) -> Self {
        Self {
            room_id: event.room_id.clone(),
            event,
            direction: Direction::Forward,
        }
    }
}

/// Forward-event consumer.
pub struct IngestPipeline {
    engine: BackfillEngine,
    receipts: Arc<dyn ReceiptSink>,
    /// Pending echoes: `txn_id` → room.
    echo_listeners: DashMap<String, String>,
}

impl IngestPipeline {
    /// Create a pipeline writing into `engine`'s store and live timelines.
    pub fn new(engine: BackfillEngine, receipts: Arc<dyn ReceiptSink>) -> Self {
        Self {
            engine,
            receipts,
            echo_listeners: DashMap::new(),
        }
    }

    /// Number of echoes awaiting confirmation.
    pub fn pending_echoes(&self) -> usize {
        self.echo_listeners.len()
    }

    /// Drain `feed` until every sender is dropped.
    pub async fn run(&self, mut feed: mpsc::Receiver<Arrival>) {
        let emitter = self.engine.emitter();
        info!(subscribers = emitter.subscriber_count(), "ingestion started");
        while let Some(arrival) = feed.recv().await {
            self.ingest(arrival).await;
        }
        info!(emitted = emitter.emit_count(), "live feed closed, ingestion stopped");
    }

    /// Handle one arrival.
    #[instrument(skip_all, fields(room_id = %arrival.room_id, event_id = %arrival.event.event_id))]
    pub async fn ingest(&self, arrival: Arrival) {
        if arrival.direction == Direction::ToStartOfTimeline {
            debug!("ignoring backward arrival");
            return;
        }
        let Arrival { room_id, event, .. } = arrival;

        if let Some(txn_id) = remote_echo_txn(&event) {
            let echo_room = match self.echo_listeners.remove(&txn_id) {
                Some((_, room)) => Some(room),
                None => self.stored_echo_room(&room_id, &txn_id),
            };
            if let Some(echo_room) = echo_room {
                debug!(%txn_id, "remote echo of a pending local event");
                let _ = self.persist(event.clone());
                let _ = self.complete_echo(&echo_room, &txn_id, &event.event_id).await;
                return;
            }
        }

        let record = self.persist(event);
        let pending = record.is_pending_echo();
        let event_id = record.event_id.clone();
        let message = ChatMessage::from_record(&record);

        if let (true, Some(txn_id)) = (pending, record.txn_id.clone()) {
            let _ = self.echo_listeners.insert(txn_id, room_id.clone());
        }
        let appended = self
            .engine
            .timelines()
            .with_room(&room_id, |t| t.push_back(record));
        if appended {
            let _ = self.engine.emitter().emit(TimelineNotification::Message(message));
        }

        if !pending {
            self.send_receipt(&room_id, &event_id).await;
        }
    }

    /// Show an outgoing event as a pending echo before it is sent. Returns
    /// the transaction id to send it with.
    pub async fn stage_local_echo(
        &self,
        room_id: &str,
        event_type: &str,
        content: Value,
        sender: &str,
    ) -> String {
        let txn_id = new_txn_id();
        let echo = EventRecord::local_echo(room_id, &txn_id, event_type, content, sender);
        self.ingest(Arrival::forward(echo)).await;
        txn_id
    }

    /// Report the confirmed id of a locally sent event.
    ///
    /// Fires the echo's listener at most once; later calls return `None`.
    #[instrument(skip(self))]
    pub async fn resolve_local_echo(&self, txn_id: &str, event_id: &str) -> Option<ChatMessage> {
        let Some((txn_id, room_id)) = self.echo_listeners.remove(txn_id) else {
            debug!("no pending echo for transaction");
            return None;
        };
        self.complete_echo(&room_id, &txn_id, event_id).await
    }

    /// Mark a locally sent event as failed.
    #[instrument(skip(self))]
    pub fn fail_local_echo(&self, txn_id: &str) -> Option<ChatMessage> {
        let (txn_id, room_id) = self.echo_listeners.remove(txn_id)?;
        let failed = match self.engine.store().mark_local_failed(&room_id, &txn_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(%room_id, %txn_id, "failed echo not found in store");
                return None;
            }
            Err(e) => {
                warn!(%room_id, %txn_id, error = %e, "failed to mark echo as failed");
                return None;
            }
        };

        let echo_id = failed.event_id.clone();
        let message = ChatMessage::from_record(&failed);
        let _ = self
            .engine
            .timelines()
            .with_room(&room_id, |t| t.replace(&echo_id, failed));
        let _ = self
            .engine
            .emitter()
            .emit(TimelineNotification::Message(message.clone()));
        Some(message)
    }

    /// Record a room's back-pagination token from the live feed.
    pub fn set_back_token(&self, room_id: &str, token: String) {
        self.engine.set_back_token(room_id, token);
    }

    async fn complete_echo(&self, room_id: &str, txn_id: &str, event_id: &str) -> Option<ChatMessage> {
        let confirmed = match self
            .engine
            .store()
            .confirm_local_echo(room_id, txn_id, event_id)
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(%room_id, %txn_id, %event_id, "nothing to confirm for echo");
                return None;
            }
            Err(e) => {
                warn!(%room_id, %txn_id, error = %e, "failed to confirm echo");
                return None;
            }
        };

        let echo_id = local_echo_id(room_id, txn_id);
        let message = ChatMessage::from_record(&confirmed);
        let replaced = self
            .engine
            .timelines()
            .with_room(room_id, |t| t.replace(&echo_id, confirmed.clone()));
        if !replaced {
            let _ = self
                .engine
                .timelines()
                .with_room(room_id, |t| t.push_back(confirmed));
        }
        let _ = self
            .engine
            .emitter()
            .emit(TimelineNotification::Message(message.clone()));

        debug!(%room_id, %txn_id, %event_id, "local echo confirmed");
        self.send_receipt(room_id, event_id).await;
        Some(message)
    }

    /// Room of a stored pending echo whose listener is gone, e.g. after a
    /// restart.
    fn stored_echo_room(&self, room_id: &str, txn_id: &str) -> Option<String> {
        match self.engine.store().find_by_txn_id(room_id, txn_id) {
            Ok(Some(record)) if record.has_local_id() && record.is_pending_echo() => {
                Some(room_id.to_owned())
            }
            Ok(_) => None,
            Err(e) => {
                warn!(%room_id, %txn_id, error = %e, "failed to look up stored echo");
                None
            }
        }
    }

    /// Persist, falling back to the caller's copy if the store fails.
    fn persist(&self, event: EventRecord) -> EventRecord {
        match self.engine.store().persist_event(event.clone()) {
            Ok(outcome) => outcome.record,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "failed to persist live event");
                event
            }
        }
    }

    async fn send_receipt(&self, room_id: &str, event_id: &str) {
        if let Err(e) = self.receipts.send_read_receipt(room_id, event_id).await {
            warn!(%room_id, %event_id, error = %e, "read receipt failed");
        }
    }
}

/// Transaction id on a remote copy of an event this client sent.
fn remote_echo_txn(event: &EventRecord) -> Option<String> {
    if event.has_local_id() {
        return None;
    }
    event.txn_id.clone()
}
