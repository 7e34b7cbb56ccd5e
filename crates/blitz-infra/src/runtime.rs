//! Runtime wiring: builds every service from a [`RuntimeConfig`] and owns
//! their lifetimes.

use std::sync::{Arc, Mutex};

use blitz_core::memory::box_embedder::BoxEmbedder;
use blitz_core::memory::service::SemanticMemory;
use blitz_core::metrics::MetricsCollector;
use blitz_core::tool::builtin::builtin_tools;
use blitz_core::tool::handler::{ConnectorTools, ToolProvider};
use blitz_core::tool::registry::ToolRegistry;
use blitz_core::transport::ToolConnector;
use blitz_types::config::RuntimeConfig;
use blitz_types::error::{MemoryError, TransportError};
use blitz_types::memory::MemoryHealth;
use blitz_types::tool::ConnectionState;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::embedding::openai::OpenAiEmbedder;
use crate::memory::MemoryBackend;
use crate::transport::Connector;

pub type Memory = SemanticMemory<MemoryBackend>;

/// Whether [`AgentRuntime::start`] should reach the tool backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Connect and register the backend's tools.
    Online,
    /// Built-in tools only; the connector is built but never connected.
    Offline,
}

#[derive(Debug, Serialize)]
pub struct RuntimeHealth {
    pub transport: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryHealth>,
}

impl RuntimeHealth {
    pub fn healthy(&self) -> bool {
        self.transport_error.is_none() && self.memory.as_ref().is_none_or(|m| m.healthy)
    }
}

pub struct AgentRuntime {
    metrics: Arc<MetricsCollector>,
    registry: Arc<ToolRegistry>,
    connector: Arc<Connector>,
    memory: Option<Arc<Memory>>,
    memory_store: Option<Arc<MemoryBackend>>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AgentRuntime {
    /// Build metrics, memory, connector and registry, then load tools.
    ///
    /// Memory that cannot be opened is logged and left out; the runtime
    /// still serves tools. An unreachable tool backend is skipped by the
    /// registry the same way. Only an invalid transport config fails.
    pub async fn start(config: &RuntimeConfig, mode: ConnectMode) -> Result<Self, TransportError> {
        let metrics = Arc::new(MetricsCollector::new(config.metrics.clone()));
        let connector = Arc::new(Connector::from_config(config)?);

        let (memory, memory_store) = match open_memory(config, &metrics).await {
            Ok(Some((memory, store))) => (Some(memory), Some(store)),
            Ok(None) => (None, None),
            Err(e) => {
                tracing::warn!(error = %e, "semantic memory unavailable, continuing without it");
                metrics.record_error("memory", &e.to_string(), None);
                (None, None)
            }
        };

        let registry = Arc::new(ToolRegistry::new(Arc::clone(&metrics)));
        let mut providers: Vec<Arc<dyn ToolProvider>> =
            vec![Arc::new(builtin_tools(memory.clone(), Arc::clone(&metrics)))];
        if mode == ConnectMode::Online {
            providers.push(Arc::new(ConnectorTools::new(Arc::clone(&connector))));
        }
        let registered = registry
            .initialize(&providers)
            .await
            .map_err(|e| TransportError::Config(e.to_string()))?;

        let shutdown = CancellationToken::new();
        let sweeper = memory.as_ref().map(|memory| {
            memory.spawn_retention_sweeper(
                config.memory.storage.cleanup_interval(),
                shutdown.child_token(),
            )
        });

        tracing::info!(
            transport = %connector.kind(),
            tools = registered,
            memory = memory.is_some(),
            "agent runtime started"
        );
        Ok(Self {
            metrics,
            registry,
            connector,
            memory,
            memory_store,
            shutdown,
            sweeper: Mutex::new(sweeper),
        })
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    pub fn memory(&self) -> Option<&Arc<Memory>> {
        self.memory.as_ref()
    }

    pub async fn health(&self) -> RuntimeHealth {
        let (transport, transport_error) = match self.connector.health_check().await {
            Ok(state) => (state, None),
            Err(e) => (self.connector.state(), Some(e.to_string())),
        };
        let memory = match &self.memory {
            Some(memory) => Some(memory.health_check().await),
            None => None,
        };
        RuntimeHealth {
            transport,
            transport_error,
            memory,
        }
    }

    /// Stop the sweeper, disconnect the transport and close the stores.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let sweeper = match self.sweeper.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }
        self.connector.disconnect().await;
        if let Some(store) = &self.memory_store {
            store.close().await;
        }
        tracing::info!("agent runtime stopped");
    }
}

async fn open_memory(
    config: &RuntimeConfig,
    metrics: &Arc<MetricsCollector>,
) -> Result<Option<(Arc<Memory>, Arc<MemoryBackend>)>, MemoryError> {
    if !config.memory.enabled {
        tracing::info!("semantic memory disabled by config");
        return Ok(None);
    }
    let embedder = OpenAiEmbedder::from_config(&config.embedding, config.memory.storage.dimension)?
        .with_metrics(Arc::clone(metrics));
    let store = Arc::new(MemoryBackend::open(&config.memory).await?);
    let memory = SemanticMemory::new(
        Arc::clone(&store),
        BoxEmbedder::new(embedder),
        config.memory.clone(),
        Arc::clone(metrics),
    );
    Ok(Some((Arc::new(memory), store)))
}
