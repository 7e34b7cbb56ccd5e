//! Tool registry, handlers and built-in tools.

pub mod builtin;
pub mod handler;
pub mod registry;
