//! Postgres storage layer.
//!
//! The pgvector-backed semantic memory store and the read-only data store
//! behind direct-mode tools.

pub mod data;
pub mod message;
pub mod pool;
