//! `SQLite` backend for the event cache.
//!
//! # Architecture
//!
//! - **[`connection`]**: `r2d2` connection pool; pragmas are applied to every
//!   connection on acquire.
//! - **[`migrations`]**: Version-tracked schema evolution, embedded at compile
//!   time and run transactionally.
//! - **[`row_types`]**: Raw row shape for `rusqlite` row mapping.
//! - **[`repositories`]**: Stateless repository structs — each method takes
//!   `&Connection` and executes SQL.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, PragmaState, new_file, new_in_memory,
    verify_pragmas,
};
pub use migrations::{current_version, latest_version, run_migrations};
