//! SQLite storage layer.
//!
//! Store implementations backed by SQLite with WAL mode and split
//! read/write connection pools. Each store owns its own database file and
//! bootstraps its schema idempotently at open time.

pub mod events;
pub mod handoffs;
pub mod pool;
pub mod state;
