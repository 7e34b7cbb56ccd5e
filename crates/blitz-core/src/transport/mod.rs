//! Transport connectors: one call/list interface over every channel that can
//! reach a tool backend.
//!
//! - [`remote::RemoteConnector`] speaks JSON-RPC over any [`ChannelOpener`]
//!   (WebSocket and stdio openers live in blitz-infra).
//! - [`direct::DirectConnector`] executes a fixed built-in tool set against a
//!   pooled [`direct::DataStore`] when no remote backend is available.

pub mod direct;
pub mod remote;
pub mod session;

use std::future::Future;

use blitz_types::error::TransportError;
use blitz_types::tool::{ConnectionState, ToolDescriptor, ToolResponse, TransportKind};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Uniform interface over every transport.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait ToolConnector: Send + Sync {
    /// Establish the channel and discover tools. Calling it again while
    /// connected is a no-op.
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Tear the channel down and forget discovered tools.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    /// Tools available on this connection.
    fn list_tools(&self) -> impl Future<Output = Result<Vec<ToolDescriptor>, TransportError>> + Send;

    /// Invoke a tool.
    ///
    /// Unknown names fail immediately with [`TransportError::ToolNotFound`].
    /// Dropping the returned future abandons the wait but does not cancel
    /// the backend operation: read-only tools are safe to abandon, remote
    /// tools with side effects are not.
    fn call_tool(
        &self,
        name: &str,
        params: Value,
    ) -> impl Future<Output = Result<ToolResponse, TransportError>> + Send;

    /// Probe the backend and report state.
    fn health_check(&self) -> impl Future<Output = Result<ConnectionState, TransportError>> + Send;

    fn state(&self) -> ConnectionState;
}

/// A freshly opened text channel to a remote tool server.
///
/// Each frame is one JSON document. `inbound` ends when the peer goes away;
/// cancelling `shutdown` asks the opener's IO tasks to close the channel.
pub struct Channel {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
    pub shutdown: CancellationToken,
}

/// Opens channels of one physical kind.
pub trait ChannelOpener: Send + Sync {
    fn open(&self) -> impl Future<Output = Result<Channel, TransportError>> + Send;

    fn kind(&self) -> TransportKind;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}

/// Comma-separated tool names for error messages.
pub(crate) fn available_names(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return "none".to_string();
    }
    tools
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
