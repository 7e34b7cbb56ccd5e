//! Logging and trace export for the blitz runtime.

pub mod tracing_setup;
