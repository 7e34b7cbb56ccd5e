//! Local tools backed by the runtime's own services.

use std::sync::Arc;

use blitz_types::error::ToolError;
use blitz_types::memory::{MemoryScope, RecallOptions};
use blitz_types::tool::{ParamSpec, ParamType, ToolDescriptor, ToolSource};
use serde_json::{Map, Value, json};

use super::handler::{ProvidedTool, StaticTools, handler_fn};
use crate::memory::service::SemanticMemory;
use crate::memory::store::MessageStore;
use crate::metrics::MetricsCollector;

pub const RECALL_MEMORY: &str = "recall-memory";
pub const RUNTIME_METRICS: &str = "runtime-metrics";

fn opt_str(params: &Map<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Optional non-negative count. Anything else present is an error rather
/// than a silent fall back to the configured default.
fn opt_count(params: &Map<String, Value>, key: &str) -> Result<Option<usize>, ToolError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| ToolError::Execution {
                tool: RECALL_MEMORY.to_string(),
                message: format!("{key} must be a non-negative integer, got {value}"),
            }),
    }
}

/// `recall-memory`: semantic search over stored conversation turns.
pub fn recall_memory_tool<S: MessageStore + 'static>(
    memory: Arc<SemanticMemory<S>>,
) -> ProvidedTool {
    let descriptor = ToolDescriptor::new(
        RECALL_MEMORY,
        "Find previously stored messages similar to a query, with surrounding context",
        "memory",
        ToolSource::Local,
    )
    .with_params(vec![
        ParamSpec::required("query", ParamType::String, "Text to search for"),
        ParamSpec::optional("thread_id", ParamType::String, "Restrict to one thread"),
        ParamSpec::optional("resource_id", ParamType::String, "Restrict to one resource"),
        ParamSpec::optional("user_id", ParamType::String, "Restrict to one user"),
        ParamSpec::optional("top_k", ParamType::Integer, "Maximum matches"),
        ParamSpec::optional(
            "similarity_threshold",
            ParamType::Number,
            "Minimum similarity in [0, 1]",
        ),
        ParamSpec::optional(
            "message_range",
            ParamType::Integer,
            "Context messages on each side of a match",
        ),
    ]);

    let handler = handler_fn(move |params: Map<String, Value>| {
        let memory = Arc::clone(&memory);
        async move {
            let query = opt_str(&params, "query").unwrap_or_default();
            let mut options = RecallOptions::scoped(MemoryScope {
                user_id: opt_str(&params, "user_id"),
                session_id: None,
                thread_id: opt_str(&params, "thread_id"),
                resource_id: opt_str(&params, "resource_id"),
            });
            options.top_k = opt_count(&params, "top_k")?;
            options.similarity_threshold = params
                .get("similarity_threshold")
                .and_then(Value::as_f64)
                .map(|t| t as f32);
            options.message_range = opt_count(&params, "message_range")?;

            let matches = memory
                .recall(&query, options)
                .await
                .map_err(|e| ToolError::Execution {
                    tool: RECALL_MEMORY.to_string(),
                    message: e.to_string(),
                })?;
            Ok(json!({
                "query": query,
                "count": matches.len(),
                "matches": matches,
            }))
        }
    });

    ProvidedTool {
        descriptor,
        handler,
    }
}

/// `runtime-metrics`: the current metrics snapshot.
pub fn runtime_metrics_tool(metrics: Arc<MetricsCollector>) -> ProvidedTool {
    let descriptor = ToolDescriptor::new(
        RUNTIME_METRICS,
        "Report call counts, latency percentiles and recent errors",
        "diagnostics",
        ToolSource::Local,
    );
    let handler = handler_fn(move |_params: Map<String, Value>| {
        let metrics = Arc::clone(&metrics);
        async move {
            serde_json::to_value(metrics.snapshot()).map_err(|e| ToolError::Execution {
                tool: RUNTIME_METRICS.to_string(),
                message: e.to_string(),
            })
        }
    });
    ProvidedTool {
        descriptor,
        handler,
    }
}

/// Provider for the built-in tools. Memory tools are only included when a
/// memory service is available.
pub fn builtin_tools<S: MessageStore + 'static>(
    memory: Option<Arc<SemanticMemory<S>>>,
    metrics: Arc<MetricsCollector>,
) -> StaticTools {
    let mut tools = vec![runtime_metrics_tool(metrics)];
    if let Some(memory) = memory {
        tools.push(recall_memory_tool(memory));
    }
    StaticTools::new("builtin", tools)
}
