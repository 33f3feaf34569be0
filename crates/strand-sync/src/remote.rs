//! Collaborators on the far side of the synchronizer.
//!
//! Transport and authentication live behind these traits; the engine only
//! needs backward pagination and a place to send read receipts.

use async_trait::async_trait;
use strand_store::ProtocolEvent;

use crate::errors::RemoteError;

/// One page of backward history.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryPage {
    /// Events, newest first.
    pub events: Vec<ProtocolEvent>,
    /// Token for the next older page. `None` means the start of the room.
    pub end: Option<String>,
}

/// Paginated access to a room's remote history.
#[async_trait]
pub trait RemoteEventSource: Send + Sync {
    /// Fetch up to `limit` events older than `from`. `from = None` starts at
    /// the live edge.
    async fn paginate_backwards(
        &self,
        room_id: &str,
        from: Option<&str>,
        limit: u32,
    ) -> Result<HistoryPage, RemoteError>;
}

/// Sends read receipts.
#[async_trait]
pub trait ReceiptSink: Send + Sync {
    /// Mark `event_id` read in `room_id`.
    async fn send_read_receipt(&self, room_id: &str, event_id: &str) -> Result<(), RemoteError>;
}
