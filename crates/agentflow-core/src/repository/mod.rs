//! Storage trait definitions ("ports").
//!
//! The infrastructure layer implements these with SQLite and the
//! filesystem. Uses native async fn in traits (no async_trait macro).

pub mod dlq;
pub mod events;
pub mod handoffs;
pub mod state;
