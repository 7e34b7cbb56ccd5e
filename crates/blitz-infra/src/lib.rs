//! Infrastructure layer for blitz.
//!
//! Implements the ports defined in `blitz-core`: WebSocket and stdio
//! channel openers, SQLite and Postgres data stores for direct mode, the
//! SQLite and pgvector message stores, and the OpenAI-compatible embedder.
//! [`runtime::AgentRuntime`] wires them together from configuration.

pub mod config;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod runtime;
pub mod sqlite;
pub mod transport;
