//! Connector for remote tool servers speaking JSON-RPC over a [`Channel`].

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use blitz_types::error::TransportError;
use blitz_types::rpc::{
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, PROTOCOL_VERSION,
};
use blitz_types::tool::{ConnectionState, RemoteToolSpec, ToolDescriptor, ToolResponse};
use serde_json::{Value, json};

use super::session::RpcSession;
use super::{ChannelOpener, ToolConnector, available_names};
use crate::backoff::BackoffPolicy;

const CLIENT_NAME: &str = "blitz";

/// Remote connector generic over the physical channel.
pub struct RemoteConnector<O: ChannelOpener> {
    opener: O,
    backoff: BackoffPolicy,
    request_timeout: Duration,
    session: RwLock<Option<Arc<RpcSession>>>,
    tools: RwLock<Vec<ToolDescriptor>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl<O: ChannelOpener> RemoteConnector<O> {
    pub fn new(opener: O, backoff: BackoffPolicy, request_timeout: Duration) -> Self {
        Self {
            opener,
            backoff,
            request_timeout,
            session: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn live_session(&self) -> Option<Arc<RpcSession>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|s| !s.is_closed())
            .cloned()
    }

    /// Session for a call: `NotConnected` before the first connect,
    /// `ConnectionLost` once the channel has gone away.
    fn require_session(&self) -> Result<Arc<RpcSession>, TransportError> {
        let guard = self.session.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            None => Err(TransportError::NotConnected),
            Some(s) if s.is_closed() => Err(TransportError::ConnectionLost),
            Some(s) => Ok(Arc::clone(s)),
        }
    }

    /// Open a channel and run the initialize handshake.
    async fn establish(&self) -> Result<RpcSession, TransportError> {
        let channel = self.opener.open().await?;
        let session = RpcSession::start(channel);

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION") },
        });
        match session
            .request(METHOD_INITIALIZE, Some(params), self.request_timeout)
            .await
        {
            Ok(info) => {
                let server = info
                    .pointer("/serverInfo/name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                tracing::info!(server, endpoint = %self.opener.endpoint(), "session initialized");
            }
            Err(e) => {
                session.close();
                return Err(e);
            }
        }

        session.notify(METHOD_INITIALIZED, None).await?;
        Ok(session)
    }

    async fn discover(&self, session: &RpcSession) -> Vec<ToolDescriptor> {
        let result = match session
            .request(METHOD_TOOLS_LIST, Some(json!({})), self.request_timeout)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "tool discovery failed, continuing with no tools");
                return Vec::new();
            }
        };

        let entries = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<RemoteToolSpec>(entry) {
                Ok(spec) => Some(spec.into_descriptor()),
                Err(e) => {
                    tracing::warn!(error = %e, "protocol error: skipping malformed tool entry");
                    None
                }
            })
            .collect()
    }

    fn cached_tools(&self) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<O: ChannelOpener> ToolConnector for RemoteConnector<O> {
    async fn connect(&self) -> Result<(), TransportError> {
        let _guard = self.connect_lock.lock().await;
        if self.live_session().is_some() {
            tracing::debug!("already connected");
            return Ok(());
        }

        let started = Instant::now();
        let session = self
            .backoff
            .retry("connect", |_| self.establish())
            .await
            .map_err(|(attempts, err)| TransportError::Connection {
                attempts,
                message: match err {
                    TransportError::Connection { message, .. } => message,
                    other => other.to_string(),
                },
            })?;

        let tools = self.discover(&session).await;
        tracing::info!(
            kind = %self.opener.kind(),
            tool_count = tools.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "connected to tool backend"
        );

        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(session));
        Ok(())
    }

    async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        let session = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.close();
            tracing::info!(kind = %self.opener.kind(), "disconnected");
        }
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        self.require_session()?;
        Ok(self.cached_tools())
    }

    async fn call_tool(&self, name: &str, params: Value) -> Result<ToolResponse, TransportError> {
        let session = self.require_session()?;
        let tools = self.cached_tools();
        if !tools.iter().any(|t| t.name == name) {
            return Err(TransportError::ToolNotFound {
                name: name.to_string(),
                available: available_names(&tools),
            });
        }

        let started = Instant::now();
        let result = session
            .request(
                METHOD_TOOLS_CALL,
                Some(json!({ "name": name, "arguments": params })),
                self.request_timeout,
            )
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let response = match result {
            Ok(value) => serde_json::from_value::<ToolResponse>(value).map_err(|e| {
                TransportError::Protocol(format!("invalid tools/call result: {e}"))
            }),
            Err(e) => Err(e),
        };
        match &response {
            Ok(resp) => tracing::info!(tool = name, duration_ms, is_error = resp.is_error, "tool call completed"),
            Err(e) => tracing::error!(tool = name, duration_ms, error = %e, "tool call failed"),
        }
        response
    }

    async fn health_check(&self) -> Result<ConnectionState, TransportError> {
        self.require_session()?;
        Ok(self.state())
    }

    fn state(&self) -> ConnectionState {
        ConnectionState {
            kind: self.opener.kind(),
            connected: self.live_session().is_some(),
            tools: self.cached_tools().into_iter().map(|t| t.name).collect(),
        }
    }
}
