//! Conversation memory domain types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Identifiers a message is filed under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl MemoryScope {
    pub fn thread(id: &str) -> Self {
        Self {
            thread_id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn resource(id: &str) -> Self {
        Self {
            resource_id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn user(id: &str) -> Self {
        Self {
            user_id: Some(id.to_string()),
            ..Self::default()
        }
    }

    /// Pick the single dimension recall filters on.
    ///
    /// Thread wins over resource, resource over user. With none of the three
    /// set recall is unscoped. `session_id` never narrows recall.
    pub fn resolve(&self) -> ScopeFilter {
        if let Some(id) = &self.thread_id {
            ScopeFilter::Thread(id.clone())
        } else if let Some(id) = &self.resource_id {
            ScopeFilter::Resource(id.clone())
        } else if let Some(id) = &self.user_id {
            ScopeFilter::User(id.clone())
        } else {
            ScopeFilter::Unscoped
        }
    }
}

/// Resolved recall scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    Thread(String),
    Resource(String),
    User(String),
    Unscoped,
}

impl ScopeFilter {
    /// Column name and bound value, `None` when unscoped.
    pub fn column(&self) -> Option<(&'static str, &str)> {
        match self {
            ScopeFilter::Thread(id) => Some(("thread_id", id)),
            ScopeFilter::Resource(id) => Some(("resource_id", id)),
            ScopeFilter::User(id) => Some(("user_id", id)),
            ScopeFilter::Unscoped => None,
        }
    }

    /// Whether a message falls inside this scope.
    pub fn contains(&self, scope: &MemoryScope) -> bool {
        match self {
            ScopeFilter::Thread(id) => scope.thread_id.as_deref() == Some(id),
            ScopeFilter::Resource(id) => scope.resource_id.as_deref() == Some(id),
            ScopeFilter::User(id) => scope.user_id.as_deref() == Some(id),
            ScopeFilter::Unscoped => true,
        }
    }
}

impl fmt::Display for ScopeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column() {
            Some((column, id)) => write!(f, "{column}={id}"),
            None => write!(f, "unscoped"),
        }
    }
}

/// A persisted conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub scope: MemoryScope,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Only populated on the value returned from a store; reads omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Input to a memory store operation.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub role: Role,
    pub scope: MemoryScope,
    pub metadata: Map<String, Value>,
}

impl NewMessage {
    pub fn new(content: impl Into<String>, role: Role) -> Self {
        Self {
            content: content.into(),
            role,
            scope: MemoryScope::default(),
            metadata: Map::new(),
        }
    }

    pub fn with_scope(mut self, scope: MemoryScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A recalled message with its similarity and surrounding turns.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticMatch {
    pub message: Message,
    /// Cosine similarity in [0, 1].
    pub similarity: f32,
    /// Neighbouring messages in timestamp order, anchor excluded.
    pub context: Vec<Message>,
}

/// Recall parameters. `None` falls back to configured defaults.
#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    pub scope: MemoryScope,
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub message_range: Option<usize>,
}

impl RecallOptions {
    pub fn scoped(scope: MemoryScope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn message_range(mut self, range: usize) -> Self {
        self.message_range = Some(range);
        self
    }
}

/// Paged history lookup. Every supplied scope id must match.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub scope: MemoryScope,
    pub limit: u32,
    pub offset: u32,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            scope: MemoryScope::default(),
            limit: 50,
            offset: 0,
        }
    }
}

/// Result of a memory backend health probe.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryHealth {
    pub healthy: bool,
    pub backend: String,
    pub message_count: u64,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
