//! Concrete transports and the config-driven connector.
//!
//! `Connector` is the one connector type the runtime holds. It wraps the
//! generic connectors from blitz-core with the channel openers and data
//! stores defined here, selected by `[transport]` and `[database]`.

pub mod stdio;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use blitz_core::backoff::BackoffPolicy;
use blitz_core::transport::ToolConnector;
use blitz_core::transport::direct::{DataStore, DirectConnector, QueryRows, TableInfo};
use blitz_core::transport::remote::RemoteConnector;
use blitz_types::config::{DatabaseConfig, RuntimeConfig};
use blitz_types::error::{RepositoryError, TransportError};
use blitz_types::tool::{ConnectionState, ToolDescriptor, ToolResponse, TransportKind};
use serde_json::Value;

use crate::postgres::data::PgDataStore;
use crate::postgres::pool::{connect_options, lazy_pool};
use crate::sqlite::data::SqliteDataStore;

pub use stdio::StdioOpener;
pub use websocket::WebSocketOpener;

/// URL scheme that selects direct mode from the `url` field.
const DIRECT_SCHEME: &str = "direct://";

// ---------------------------------------------------------------------------
// Direct-mode data store
// ---------------------------------------------------------------------------

pub enum DirectStore {
    Sqlite(SqliteDataStore),
    Postgres(PgDataStore),
}

impl DirectStore {
    /// Build a lazily connecting store. No connection is made here.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, TransportError> {
        if let Some(url) = config.url.as_deref().filter(|u| u.starts_with("sqlite:")) {
            let store = SqliteDataStore::connect_lazy(url, config.pool_size)
                .map_err(|e| TransportError::Config(e.to_string()))?;
            return Ok(Self::Sqlite(store));
        }
        let options = connect_options(config).map_err(|e| TransportError::Config(e.to_string()))?;
        let pool = lazy_pool(options, config.pool_size);
        Ok(Self::Postgres(PgDataStore::new(
            pool,
            Duration::from_secs(config.statement_timeout_secs),
        )))
    }
}

impl DataStore for DirectStore {
    async fn run_query(&self, sql: &str, limit: u32) -> Result<QueryRows, RepositoryError> {
        match self {
            Self::Sqlite(s) => s.run_query(sql, limit).await,
            Self::Postgres(s) => s.run_query(sql, limit).await,
        }
    }

    async fn list_schema(&self, schema: &str) -> Result<Vec<TableInfo>, RepositoryError> {
        match self {
            Self::Sqlite(s) => s.list_schema(schema).await,
            Self::Postgres(s) => s.list_schema(schema).await,
        }
    }

    async fn sample_rows(&self, table: &str, limit: u32) -> Result<QueryRows, RepositoryError> {
        match self {
            Self::Sqlite(s) => s.sample_rows(table, limit).await,
            Self::Postgres(s) => s.sample_rows(table, limit).await,
        }
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(s) => s.ping().await,
            Self::Postgres(s) => s.ping().await,
        }
    }

    async fn close(&self) {
        match self {
            Self::Sqlite(s) => s.close().await,
            Self::Postgres(s) => s.close().await,
        }
    }

    fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(s) => s.backend(),
            Self::Postgres(s) => s.backend(),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// The connector selected by configuration.
pub enum Connector {
    WebSocket(RemoteConnector<WebSocketOpener>),
    Stdio(RemoteConnector<StdioOpener>),
    Direct(DirectConnector<DirectStore>),
}

impl Connector {
    /// Build the connector described by `config`. Nothing connects until
    /// [`ToolConnector::connect`] is called.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, TransportError> {
        let transport = &config.transport;
        let backoff = BackoffPolicy::from(&transport.backoff);
        let timeout = transport.request_timeout();

        let kind = match transport.kind {
            TransportKind::WebSocket if transport.url.starts_with(DIRECT_SCHEME) => {
                TransportKind::Direct
            }
            other => other,
        };

        let connector = match kind {
            TransportKind::WebSocket => Self::WebSocket(RemoteConnector::new(
                WebSocketOpener::new(&transport.url)?,
                backoff,
                timeout,
            )),
            TransportKind::Stdio => {
                let command = transport.command.as_deref().ok_or_else(|| {
                    TransportError::Config("stdio transport requires transport.command".to_string())
                })?;
                Self::Stdio(RemoteConnector::new(
                    StdioOpener::new(command, transport.args.clone(), transport.env.clone()),
                    backoff,
                    timeout,
                ))
            }
            TransportKind::Direct => {
                let store = DirectStore::from_config(&config.database)?;
                Self::Direct(DirectConnector::new(Arc::new(store), backoff))
            }
        };
        tracing::debug!(kind = %connector.kind(), "connector configured");
        Ok(connector)
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::WebSocket(_) => TransportKind::WebSocket,
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Direct(_) => TransportKind::Direct,
        }
    }
}

impl ToolConnector for Connector {
    async fn connect(&self) -> Result<(), TransportError> {
        match self {
            Self::WebSocket(c) => c.connect().await,
            Self::Stdio(c) => c.connect().await,
            Self::Direct(c) => c.connect().await,
        }
    }

    async fn disconnect(&self) {
        match self {
            Self::WebSocket(c) => c.disconnect().await,
            Self::Stdio(c) => c.disconnect().await,
            Self::Direct(c) => c.disconnect().await,
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        match self {
            Self::WebSocket(c) => c.list_tools().await,
            Self::Stdio(c) => c.list_tools().await,
            Self::Direct(c) => c.list_tools().await,
        }
    }

    async fn call_tool(&self, name: &str, params: Value) -> Result<ToolResponse, TransportError> {
        match self {
            Self::WebSocket(c) => c.call_tool(name, params).await,
            Self::Stdio(c) => c.call_tool(name, params).await,
            Self::Direct(c) => c.call_tool(name, params).await,
        }
    }

    async fn health_check(&self) -> Result<ConnectionState, TransportError> {
        match self {
            Self::WebSocket(c) => c.health_check().await,
            Self::Stdio(c) => c.health_check().await,
            Self::Direct(c) => c.health_check().await,
        }
    }

    fn state(&self) -> ConnectionState {
        match self {
            Self::WebSocket(c) => c.state(),
            Self::Stdio(c) => c.state(),
            Self::Direct(c) => c.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_websocket() {
        let connector = Connector::from_config(&RuntimeConfig::default()).unwrap();
        assert_eq!(connector.kind(), TransportKind::WebSocket);
        let state = connector.state();
        assert_eq!(state.kind, TransportKind::WebSocket);
        assert!(!state.connected);
    }

    #[test]
    fn test_stdio_requires_command() {
        let mut config = RuntimeConfig::default();
        config.transport.kind = TransportKind::Stdio;
        assert!(matches!(
            Connector::from_config(&config),
            Err(TransportError::Config(_))
        ));
        config.transport.command = Some("cat".to_string());
        assert_eq!(Connector::from_config(&config).unwrap().kind(), TransportKind::Stdio);
    }

    #[tokio::test]
    async fn test_direct_scheme_selects_direct_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        let seed = sqlx::SqlitePool::connect(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();
        sqlx::query("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
            .execute(&seed)
            .await
            .unwrap();
        sqlx::query("INSERT INTO notes (body) VALUES ('hello')")
            .execute(&seed)
            .await
            .unwrap();
        seed.close().await;

        let mut config = RuntimeConfig::default();
        config.transport.url = "direct://local".to_string();
        config.database.url = Some(format!("sqlite://{}", path.display()));
        let connector = Connector::from_config(&config).unwrap();
        assert_eq!(connector.kind(), TransportKind::Direct);

        connector.connect().await.unwrap();
        assert!(connector.state().connected);
        let names: Vec<String> = connector
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert!(names.contains(&"execute-query".to_string()));

        let response = connector
            .call_tool("execute-query", serde_json::json!({"query": "SELECT body FROM notes"}))
            .await
            .unwrap();
        assert!(!response.is_error);
        connector.disconnect().await;
    }

    #[tokio::test]
    async fn test_direct_postgres_is_lazy() {
        let mut config = RuntimeConfig::default();
        config.transport.kind = TransportKind::Direct;
        let connector = Connector::from_config(&config).unwrap();
        assert_eq!(connector.kind(), TransportKind::Direct);
    }
}
