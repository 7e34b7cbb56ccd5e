//! Core runtime logic and port definitions for Blitz.
//!
//! This crate defines the transport, memory store and embedder "ports" that
//! the infrastructure layer implements. It depends only on `blitz-types`,
//! never on `blitz-infra` or any database/IO crate.

pub mod backoff;
pub mod memory;
pub mod metrics;
pub mod tool;
pub mod transport;
