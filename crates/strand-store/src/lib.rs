//! # strand-store
//!
//! Durable event cache for the Strand chat synchronizer.
//!
//! - **Event records**: normalized, persisted copies of remote protocol events,
//!   plus locally originated echoes awaiting confirmation
//! - **Event kinds**: closed enum over the known event type tags with an
//!   explicit `Unknown` variant
//! - **`SQLite` backend**: `rusqlite` + `r2d2` pool, one partitioned `events`
//!   table indexed on `(room_id, origin_server_ts)`
//! - **Store API**: idempotent upserts with merge-by-presence, newest-first page
//!   queries, local echo confirmation, room-level drop
//! - **Migrations**: version-tracked SQL schema evolution

#![deny(unsafe_code)]

pub mod errors;
pub mod kind;
pub mod record;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use kind::EventKind;
pub use record::{
    EventRecord, LocalStatus, ProtocolEvent, local_echo_id, merge_by_presence, new_txn_id,
};
pub use sqlite::{ConnectionConfig, ConnectionPool};
pub use store::{EventCacheStore, PagePosition, PersistOutcome, RoomSummary, StoredEvent};
