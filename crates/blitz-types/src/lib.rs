pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod rpc;
pub mod tool;
