//! SQLite storage layer.
//!
//! The semantic memory store (WAL mode, split read/write pools) and the
//! read-only data store behind direct-mode tools.

pub mod data;
pub mod message;
pub mod pool;
