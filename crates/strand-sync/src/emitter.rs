//! Broadcast channel for timeline changes.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::message::ChatMessage;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Something the UI should redraw.
#[derive(Clone, Debug, PartialEq)]
pub enum TimelineNotification {
    /// Backfill finished a page for a room.
    Refreshed {
        /// Room that changed.
        room_id: String,
        /// Events prepended to its live timeline.
        added: usize,
    },
    /// A message was added or its delivery state changed.
    Message(ChatMessage),
}

/// Broadcast-based emitter.
///
/// `emit` never awaits. Slow receivers lag and drop notifications instead of
/// blocking ingestion.
#[derive(Debug)]
pub struct TimelineEmitter {
    tx: broadcast::Sender<TimelineNotification>,
    emit_count: AtomicU64,
}

impl TimelineEmitter {
    /// Create an emitter with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an emitter with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            emit_count: AtomicU64::new(0),
        }
    }

    /// Send to every subscriber. Returns how many received it.
    pub fn emit(&self, notification: TimelineNotification) -> usize {
        let _ = self.emit_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(notification).unwrap_or(0)
    }

    /// Receive everything emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TimelineNotification> {
        self.tx.subscribe()
    }

    /// Active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total notifications emitted.
    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }
}

impl Default for TimelineEmitter {
    fn default() -> Self {
        Self::new()
    }
}
