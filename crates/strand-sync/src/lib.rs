//! # strand-sync
//!
//! Keeps the local event cache in step with a remote room history.
//!
//! - **Cursors**: per-room scrollback position, monotonically non-increasing
//! - **Live timelines**: in-memory window per room shared by backfill and
//!   ingestion
//! - **Backfill engine**: local-first backward paging with per-room
//!   single-flight and retry cooldown
//! - **Ingestion**: persists live events, reconciles local echoes, sends read
//!   receipts
//! - **Query facade**: paged [`ChatMessage`] reads that backfill on demand

#![deny(unsafe_code)]

pub mod backfill;
pub mod cursor;
pub mod emitter;
pub mod errors;
pub mod ingest;
pub mod message;
pub mod query;
pub mod remote;
pub mod timeline;

pub use backfill::{BackfillConfig, BackfillEngine, PageSource, ScrollbackOutcome};
pub use cursor::{BackToken, CursorTracker, ScrollbackCursor};
pub use emitter::{TimelineEmitter, TimelineNotification};
pub use errors::{RemoteError, Result, SyncError};
pub use ingest::{Arrival, Direction, IngestPipeline};
pub use message::{ChatMessage, DeliveryStatus, MessageSender, QuickReplies, QuickReply};
pub use query::MessageQuery;
pub use remote::{HistoryPage, ReceiptSink, RemoteEventSource};
pub use timeline::{LiveTimelines, RoomTimeline};
