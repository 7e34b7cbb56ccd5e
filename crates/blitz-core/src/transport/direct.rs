//! Direct fallback connector.
//!
//! Used when no remote tool server is reachable. Owns a pooled data store and
//! exposes a fixed set of read-only data tools. Failures the caller can fix
//! (bad SQL, unknown table, bad arguments) come back as an error response;
//! only infrastructure failures are returned as `Err`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use blitz_types::error::{RepositoryError, TransportError};
use blitz_types::tool::{
    ConnectionState, ParamSpec, ParamType, ToolDescriptor, ToolResponse, ToolSource, TransportKind,
};
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::{ToolConnector, available_names};
use crate::backoff::BackoffPolicy;

pub const DEFAULT_QUERY_LIMIT: u32 = 100;
pub const DEFAULT_SAMPLE_LIMIT: u32 = 10;
pub const DEFAULT_SCHEMA: &str = "public";
/// Upper bound on any caller-supplied row limit.
pub const MAX_ROW_LIMIT: u32 = 10_000;

// ---------------------------------------------------------------------------
// Data store port
// ---------------------------------------------------------------------------

/// Rows returned by a data tool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    /// True when more rows were available than the limit allowed.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
}

/// Read-only access to the backing relational store.
///
/// Implementations enforce `limit` at execution time; the query text is
/// never rewritten. `RepositoryError::Query` and `NotFound` are business
/// failures; `Connection` is an infrastructure failure.
pub trait DataStore: Send + Sync {
    fn run_query(
        &self,
        sql: &str,
        limit: u32,
    ) -> impl Future<Output = Result<QueryRows, RepositoryError>> + Send;

    fn list_schema(
        &self,
        schema: &str,
    ) -> impl Future<Output = Result<Vec<TableInfo>, RepositoryError>> + Send;

    /// `table` has already passed [`is_valid_table_name`].
    fn sample_rows(
        &self,
        table: &str,
        limit: u32,
    ) -> impl Future<Output = Result<QueryRows, RepositoryError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Backend label for logs ("sqlite", "postgres").
    fn backend(&self) -> &'static str;
}

/// `name` or `schema.name`, each segment `[A-Za-z0-9_]+` not starting with
/// a digit.
pub fn is_valid_table_name(name: &str) -> bool {
    let segments: Vec<&str> = name.split('.').collect();
    segments.len() <= 2
        && segments.iter().all(|seg| {
            !seg.is_empty()
                && !seg.starts_with(|c: char| c.is_ascii_digit())
                && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

// ---------------------------------------------------------------------------
// Built-in tools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectTool {
    ExecuteQuery,
    ListSchema,
    SampleRows,
}

impl DirectTool {
    const ALL: [DirectTool; 3] = [
        DirectTool::ExecuteQuery,
        DirectTool::ListSchema,
        DirectTool::SampleRows,
    ];

    fn name(self) -> &'static str {
        match self {
            DirectTool::ExecuteQuery => "execute-query",
            DirectTool::ListSchema => "list-schema",
            DirectTool::SampleRows => "sample-rows",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    fn descriptor(self) -> ToolDescriptor {
        match self {
            DirectTool::ExecuteQuery => ToolDescriptor::new(
                self.name(),
                "Run a read-only SQL query and return at most `limit` rows",
                "database",
                ToolSource::Remote,
            )
            .with_params(vec![
                ParamSpec::required("query", ParamType::String, "SQL query to execute"),
                ParamSpec::optional("limit", ParamType::Integer, "Maximum rows to return")
                    .with_default(DEFAULT_QUERY_LIMIT),
            ]),
            DirectTool::ListSchema => ToolDescriptor::new(
                self.name(),
                "List tables and their columns in a schema",
                "database",
                ToolSource::Remote,
            )
            .with_params(vec![
                ParamSpec::optional("schema", ParamType::String, "Schema to inspect")
                    .with_default(DEFAULT_SCHEMA),
            ]),
            DirectTool::SampleRows => ToolDescriptor::new(
                self.name(),
                "Return a few rows from a table",
                "database",
                ToolSource::Remote,
            )
            .with_params(vec![
                ParamSpec::required("table_name", ParamType::String, "Table to sample"),
                ParamSpec::optional("limit", ParamType::Integer, "Rows to return")
                    .with_default(DEFAULT_SAMPLE_LIMIT),
            ]),
        }
    }
}

/// Bad arguments to a direct tool, reported as an error response.
struct ArgError(String);

fn str_arg<'a>(
    params: &'a Value,
    name: &str,
    default: Option<&'a str>,
) -> Result<&'a str, ArgError> {
    match params.get(name) {
        None | Some(Value::Null) => {
            default.ok_or_else(|| ArgError(format!("missing required parameter '{name}'")))
        }
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ArgError(format!("parameter '{name}' must be a string"))),
    }
}

fn limit_arg(params: &Value, default: u32) -> Result<u32, ArgError> {
    match params.get("limit") {
        None | Some(Value::Null) => Ok(default),
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 => Ok(n.min(u64::from(MAX_ROW_LIMIT)) as u32),
            _ => Err(ArgError("parameter 'limit' must be a positive integer".into())),
        },
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Connector that executes built-in data tools against a [`DataStore`].
pub struct DirectConnector<S: DataStore> {
    store: Arc<S>,
    backoff: BackoffPolicy,
    connected: AtomicBool,
}

impl<S: DataStore> DirectConnector<S> {
    pub fn new(store: Arc<S>, backoff: BackoffPolicy) -> Self {
        Self {
            store,
            backoff,
            connected: AtomicBool::new(false),
        }
    }

    fn tools() -> Vec<ToolDescriptor> {
        DirectTool::ALL.into_iter().map(DirectTool::descriptor).collect()
    }

    async fn dispatch(
        &self,
        tool: DirectTool,
        params: &Value,
    ) -> Result<ToolResponse, TransportError> {
        let outcome = match tool {
            DirectTool::ExecuteQuery => {
                let args = str_arg(params, "query", None)
                    .and_then(|q| Ok((q, limit_arg(params, DEFAULT_QUERY_LIMIT)?)));
                match args {
                    Ok((query, limit)) => self.store.run_query(query, limit).await.map(|rows| {
                        json!({
                            "row_count": rows.rows.len(),
                            "limit": limit,
                            "truncated": rows.truncated,
                            "columns": rows.columns,
                            "rows": rows.rows,
                        })
                    }),
                    Err(ArgError(msg)) => return Ok(ToolResponse::error(msg)),
                }
            }
            DirectTool::ListSchema => match str_arg(params, "schema", Some(DEFAULT_SCHEMA)) {
                Ok(schema) => self.store.list_schema(schema).await.map(|tables| {
                    json!({
                        "schema": schema,
                        "table_count": tables.len(),
                        "tables": tables,
                    })
                }),
                Err(ArgError(msg)) => return Ok(ToolResponse::error(msg)),
            },
            DirectTool::SampleRows => {
                let args = str_arg(params, "table_name", None)
                    .and_then(|t| Ok((t, limit_arg(params, DEFAULT_SAMPLE_LIMIT)?)));
                match args {
                    Ok((table, _)) if !is_valid_table_name(table) => {
                        return Ok(ToolResponse::error(format!("invalid table name '{table}'")));
                    }
                    Ok((table, limit)) => self.store.sample_rows(table, limit).await.map(|rows| {
                        json!({
                            "table": table,
                            "row_count": rows.rows.len(),
                            "columns": rows.columns,
                            "rows": rows.rows,
                        })
                    }),
                    Err(ArgError(msg)) => return Ok(ToolResponse::error(msg)),
                }
            }
        };

        match outcome {
            Ok(payload) => Ok(ToolResponse::json(payload)),
            Err(RepositoryError::Connection) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TransportError::ConnectionLost)
            }
            Err(RepositoryError::NotFound) => Ok(ToolResponse::error("not found")),
            Err(RepositoryError::Query(msg) | RepositoryError::Conflict(msg)) => {
                Ok(ToolResponse::error(msg))
            }
        }
    }
}

impl<S: DataStore> ToolConnector for DirectConnector<S> {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.backoff
            .retry("direct connect", |_| self.store.ping())
            .await
            .map_err(|(attempts, err)| TransportError::Connection {
                attempts,
                message: err.to_string(),
            })?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            backend = self.store.backend(),
            tool_count = DirectTool::ALL.len(),
            "direct data store connected"
        );
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.store.close().await;
            tracing::info!(backend = self.store.backend(), "direct data store closed");
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        Ok(Self::tools())
    }

    async fn call_tool(&self, name: &str, params: Value) -> Result<ToolResponse, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let Some(tool) = DirectTool::from_name(name) else {
            return Err(TransportError::ToolNotFound {
                name: name.to_string(),
                available: available_names(&Self::tools()),
            });
        };

        let started = Instant::now();
        let result = self.dispatch(tool, &params).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(resp) if resp.is_error => tracing::warn!(
                tool = name,
                duration_ms,
                error = %resp.joined_text(),
                "direct tool reported an error"
            ),
            Ok(_) => tracing::info!(tool = name, duration_ms, "direct tool completed"),
            Err(e) => tracing::error!(tool = name, duration_ms, error = %e, "direct tool failed"),
        }
        result
    }

    async fn health_check(&self) -> Result<ConnectionState, TransportError> {
        self.store.ping().await.map_err(|e| TransportError::Connection {
            attempts: 1,
            message: e.to_string(),
        })?;
        Ok(self.state())
    }

    fn state(&self) -> ConnectionState {
        let connected = self.connected.load(Ordering::SeqCst);
        ConnectionState {
            kind: TransportKind::Direct,
            connected,
            tools: if connected {
                DirectTool::ALL.iter().map(|t| t.name().to_string()).collect()
            } else {
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        queries: Mutex<Vec<(String, u32)>>,
        offline: bool,
    }

    impl DataStore for FakeStore {
        async fn run_query(&self, sql: &str, limit: u32) -> Result<QueryRows, RepositoryError> {
            self.queries.lock().unwrap().push((sql.to_string(), limit));
            if self.offline {
                return Err(RepositoryError::Connection);
            }
            if sql.contains("SELEC ") {
                return Err(RepositoryError::Query("syntax error at or near \"SELEC\"".into()));
            }
            let mut row = Map::new();
            row.insert("n".into(), json!(1));
            Ok(QueryRows {
                columns: vec!["n".into()],
                rows: vec![row],
                truncated: false,
            })
        }

        async fn list_schema(&self, schema: &str) -> Result<Vec<TableInfo>, RepositoryError> {
            Ok(vec![TableInfo {
                table_name: format!("{schema}.games"),
                columns: vec![ColumnInfo {
                    name: "id".into(),
                    data_type: "integer".into(),
                    nullable: false,
                }],
            }])
        }

        async fn sample_rows(&self, table: &str, limit: u32) -> Result<QueryRows, RepositoryError> {
            self.queries.lock().unwrap().push((table.to_string(), limit));
            if table == "missing" {
                return Err(RepositoryError::Query("no such table: missing".into()));
            }
            Ok(QueryRows::default())
        }

        async fn ping(&self) -> Result<(), RepositoryError> {
            if self.offline {
                Err(RepositoryError::Connection)
            } else {
                Ok(())
            }
        }

        async fn close(&self) {}

        fn backend(&self) -> &'static str {
            "fake"
        }
    }

    async fn connected(store: FakeStore) -> (DirectConnector<FakeStore>, Arc<FakeStore>) {
        let store = Arc::new(store);
        let conn = DirectConnector::new(Arc::clone(&store), BackoffPolicy::new(1, std::time::Duration::ZERO, 2.0));
        conn.connect().await.unwrap();
        (conn, store)
    }

    #[tokio::test]
    async fn test_builtin_tool_set() {
        let (conn, _) = connected(FakeStore::default()).await;
        let names: Vec<String> = conn.list_tools().await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["execute-query", "list-schema", "sample-rows"]);
        let query = DirectTool::ExecuteQuery.descriptor();
        assert_eq!(query.schema.get("limit").unwrap().default, Some(json!(100)));
        assert_eq!(DirectTool::SampleRows.descriptor().schema.get("limit").unwrap().default, Some(json!(10)));
    }

    #[tokio::test]
    async fn test_execute_query_applies_default_limit_without_touching_sql() {
        let (conn, store) = connected(FakeStore::default()).await;
        let resp = conn
            .call_tool("execute-query", json!({"query": "SELECT n FROM t -- trailing comment"}))
            .await
            .unwrap();
        assert!(!resp.is_error);
        assert_eq!(resp.payload()["row_count"], json!(1));
        let recorded = store.queries.lock().unwrap().clone();
        assert_eq!(recorded, vec![("SELECT n FROM t -- trailing comment".to_string(), 100)]);
    }

    #[tokio::test]
    async fn test_bad_sql_is_an_error_response() {
        let (conn, _) = connected(FakeStore::default()).await;
        let resp = conn
            .call_tool("execute-query", json!({"query": "SELEC 1"}))
            .await
            .unwrap();
        assert!(resp.is_error);
        assert!(resp.joined_text().contains("syntax error"));
    }

    #[tokio::test]
    async fn test_bad_arguments_are_error_responses() {
        let (conn, _) = connected(FakeStore::default()).await;
        let resp = conn.call_tool("execute-query", json!({})).await.unwrap();
        assert!(resp.is_error);
        let resp = conn
            .call_tool("execute-query", json!({"query": "SELECT 1", "limit": 0}))
            .await
            .unwrap();
        assert!(resp.is_error);
        let resp = conn
            .call_tool("sample-rows", json!({"table_name": "games; DROP TABLE games"}))
            .await
            .unwrap();
        assert!(resp.is_error);
    }

    #[tokio::test]
    async fn test_list_schema_defaults_to_public() {
        let (conn, _) = connected(FakeStore::default()).await;
        let resp = conn.call_tool("list-schema", json!({})).await.unwrap();
        let payload = resp.payload();
        assert_eq!(payload["schema"], json!("public"));
        assert_eq!(payload["tables"][0]["table_name"], json!("public.games"));
    }

    #[tokio::test]
    async fn test_sample_rows_limits() {
        let (conn, store) = connected(FakeStore::default()).await;
        conn.call_tool("sample-rows", json!({"table_name": "games"})).await.unwrap();
        conn.call_tool("sample-rows", json!({"table_name": "nba.games", "limit": 50_000}))
            .await
            .unwrap();
        let recorded = store.queries.lock().unwrap().clone();
        assert_eq!(recorded[0], ("games".to_string(), 10));
        assert_eq!(recorded[1], ("nba.games".to_string(), MAX_ROW_LIMIT));

        let resp = conn.call_tool("sample-rows", json!({"table_name": "missing"})).await.unwrap();
        assert!(resp.is_error);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_not_connected() {
        let (conn, _) = connected(FakeStore::default()).await;
        let err = conn.call_tool("drop-database", json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::ToolNotFound { .. }));

        conn.disconnect().await;
        let err = conn.call_tool("list-schema", json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(conn.state().tools.is_empty());
    }

    #[tokio::test]
    async fn test_connect_fails_when_store_offline() {
        let store = Arc::new(FakeStore {
            offline: true,
            ..FakeStore::default()
        });
        let conn = DirectConnector::new(store, BackoffPolicy::new(2, std::time::Duration::ZERO, 2.0));
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Connection { attempts: 2, .. }));
    }

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("games"));
        assert!(is_valid_table_name("nba.player_stats"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("a.b.c"));
        assert!(!is_valid_table_name("1games"));
        assert!(!is_valid_table_name("games;--"));
        assert!(!is_valid_table_name("\"games\""));
    }
}
