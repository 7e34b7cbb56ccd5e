use thiserror::Error;

use crate::tool::ParamIssue;

/// Errors raised while reaching or talking to a tool backend.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection failed after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },

    #[error("connection lost")]
    ConnectionLost,

    #[error("transport not connected")]
    NotConnected,

    #[error("request '{method}' timed out after {after_ms}ms")]
    Timeout { method: String, after_ms: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("tool '{name}' not found (available: {available})")]
    ToolNotFound { name: String, available: String },

    #[error("transport configuration error: {0}")]
    Config(String),
}

/// Errors from tool registration and invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    NotFound(String),

    #[error("tool '{0}' is disabled")]
    Disabled(String),

    #[error("invalid parameters for tool '{tool}': {}", format_issues(.issues))]
    Validation { tool: String, issues: Vec<ParamIssue> },

    #[error("tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },

    #[error("tool registration failed: {0}")]
    Registration(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ToolError {
    /// Short machine-readable label, used for metrics and result metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "not_found",
            ToolError::Disabled(_) => "disabled",
            ToolError::Validation { .. } => "validation",
            ToolError::Execution { .. } => "execution",
            ToolError::Registration(_) => "registration",
            ToolError::Transport(TransportError::Timeout { .. }) => "timeout",
            ToolError::Transport(_) => "transport",
        }
    }
}

fn format_issues(issues: &[ParamIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from the embedding provider.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid embedding response: {0}")]
    Decode(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding provider returned no vectors")]
    Empty,

    #[error("embedding configuration error: {0}")]
    Config(String),
}

/// Errors from the semantic memory service.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("storage failed: {0}")]
    Storage(#[from] RepositoryError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("semantic memory is disabled")]
    Disabled,
}

/// Errors from repository operations (used by store traits in blitz-core).
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from loading runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting '{key}': {message}")]
    Invalid { key: &'static str, message: String },
}
