//! Tool handlers and providers.
//!
//! `ToolHandler` uses RPITIT; the registry stores handlers behind the
//! object-safe [`ToolHandlerDyn`] via [`BoxToolHandler`], following the same
//! blanket-impl pattern as [`crate::memory::box_embedder::BoxEmbedder`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use blitz_types::error::ToolError;
use blitz_types::tool::ToolDescriptor;
use serde_json::{Map, Value};

use crate::transport::ToolConnector;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;

/// Executes one tool. Parameters arrive validated with defaults applied.
pub trait ToolHandler: Send + Sync {
    fn call(
        &self,
        params: Map<String, Value>,
    ) -> impl Future<Output = Result<Value, ToolError>> + Send;
}

/// Object-safe version of [`ToolHandler`] with boxed futures.
pub trait ToolHandlerDyn: Send + Sync {
    fn call_boxed(&self, params: Map<String, Value>) -> HandlerFuture<'_>;
}

impl<T: ToolHandler> ToolHandlerDyn for T {
    fn call_boxed(&self, params: Map<String, Value>) -> HandlerFuture<'_> {
        Box::pin(self.call(params))
    }
}

/// Type-erased, cheaply cloneable handler.
#[derive(Clone)]
pub struct BoxToolHandler {
    inner: Arc<dyn ToolHandlerDyn>,
}

impl BoxToolHandler {
    pub fn new<T: ToolHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Arc::new(handler),
        }
    }

    pub async fn call(&self, params: Map<String, Value>) -> Result<Value, ToolError> {
        self.inner.call_boxed(params).await
    }
}

/// Closure-backed handler. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    fn call(
        &self,
        params: Map<String, Value>,
    ) -> impl Future<Output = Result<Value, ToolError>> + Send {
        (self.f)(params)
    }
}

/// Wrap an async closure as a boxed handler.
pub fn handler_fn<F, Fut>(f: F) -> BoxToolHandler
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    BoxToolHandler::new(FnHandler { f })
}

// ---------------------------------------------------------------------------
// Connector forwarding
// ---------------------------------------------------------------------------

/// Forwards calls for one tool to a connector. An error response from the
/// backend becomes [`ToolError::Execution`].
pub struct ConnectorHandler<C> {
    connector: Arc<C>,
    tool: String,
}

impl<C: ToolConnector> ToolHandler for ConnectorHandler<C> {
    async fn call(&self, params: Map<String, Value>) -> Result<Value, ToolError> {
        let response = self
            .connector
            .call_tool(&self.tool, Value::Object(params))
            .await?;
        if response.is_error {
            return Err(ToolError::Execution {
                tool: self.tool.clone(),
                message: response.joined_text(),
            });
        }
        Ok(response.payload())
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// A descriptor paired with the handler that serves it.
#[derive(Clone)]
pub struct ProvidedTool {
    pub descriptor: ToolDescriptor,
    pub handler: BoxToolHandler,
}

pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<ProvidedTool>, ToolError>> + Send + 'a>>;

/// A source of tools loaded at registry initialization.
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;

    fn provide(&self) -> ProviderFuture<'_>;
}

/// Provider over a fixed list of tools.
pub struct StaticTools {
    name: String,
    tools: Vec<ProvidedTool>,
}

impl StaticTools {
    pub fn new(name: &str, tools: Vec<ProvidedTool>) -> Self {
        Self {
            name: name.to_string(),
            tools,
        }
    }
}

impl ToolProvider for StaticTools {
    fn name(&self) -> &str {
        &self.name
    }

    fn provide(&self) -> ProviderFuture<'_> {
        let tools = self.tools.clone();
        Box::pin(async move { Ok::<_, ToolError>(tools) })
    }
}

/// Provider that connects a connector and exposes every tool it lists.
pub struct ConnectorTools<C> {
    connector: Arc<C>,
}

impl<C: ToolConnector + 'static> ConnectorTools<C> {
    pub fn new(connector: Arc<C>) -> Self {
        Self { connector }
    }
}

impl<C: ToolConnector + 'static> ToolProvider for ConnectorTools<C> {
    fn name(&self) -> &str {
        "connector"
    }

    fn provide(&self) -> ProviderFuture<'_> {
        Box::pin(async move {
            self.connector.connect().await?;
            let descriptors = self.connector.list_tools().await?;
            let tools: Vec<ProvidedTool> = descriptors
                .into_iter()
                .map(|descriptor| {
                    let handler = BoxToolHandler::new(ConnectorHandler {
                        connector: Arc::clone(&self.connector),
                        tool: descriptor.name.clone(),
                    });
                    ProvidedTool {
                        descriptor,
                        handler,
                    }
                })
                .collect();
            Ok::<_, ToolError>(tools)
        })
    }
}
