//! Application state for CLI commands.
//!
//! AppState pins the runtime to the concrete infra implementations and
//! remembers where its configuration came from.

use std::path::PathBuf;
use std::sync::Arc;

use blitz_core::metrics::MetricsCollector;
use blitz_core::tool::registry::ToolRegistry;
use blitz_infra::runtime::{AgentRuntime, ConnectMode, Memory};
use blitz_types::config::RuntimeConfig;

pub struct AppState {
    pub runtime: AgentRuntime,
    pub config_path: PathBuf,
}

impl AppState {
    pub async fn init(
        config: &RuntimeConfig,
        config_path: PathBuf,
        mode: ConnectMode,
    ) -> anyhow::Result<Self> {
        let runtime = AgentRuntime::start(config, mode).await?;
        Ok(Self {
            runtime,
            config_path,
        })
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.runtime.registry()
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.runtime.metrics()
    }

    /// The memory service, or an error explaining why it is unavailable.
    pub fn memory(&self) -> anyhow::Result<&Arc<Memory>> {
        self.runtime.memory().ok_or_else(|| {
            anyhow::anyhow!(
                "semantic memory is unavailable (disabled, or the embedding provider is not configured in {})",
                self.config_path.display()
            )
        })
    }

    pub async fn shutdown(&self) {
        self.runtime.shutdown().await;
    }
}
