//! Tool registry: the single catalog of invocable tools.
//!
//! Local built-ins, connector-discovered tools and other providers are all
//! registered here. `execute` validates parameters before any handler runs,
//! wraps every outcome in a [`ToolResult`] and feeds the metrics collector.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use blitz_types::error::{ToolError, TransportError};
use blitz_types::tool::{
    ParamIssue, ParamType, ToolDescriptor, ToolResult, ToolSource, json_type_name,
};
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::{Map, Value};

use super::handler::{BoxToolHandler, ToolProvider};
use crate::metrics::MetricsCollector;

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Criteria for [`ToolRegistry::list`].
#[derive(Debug, Clone)]
pub struct ToolFilter {
    pub category: Option<String>,
    pub source: Option<ToolSource>,
    pub enabled_only: bool,
}

impl Default for ToolFilter {
    fn default() -> Self {
        Self {
            category: None,
            source: None,
            enabled_only: true,
        }
    }
}

impl ToolFilter {
    pub fn all() -> Self {
        Self {
            enabled_only: false,
            ..Self::default()
        }
    }

    fn matches(&self, descriptor: &ToolDescriptor) -> bool {
        (!self.enabled_only || descriptor.enabled)
            && self
                .category
                .as_ref()
                .is_none_or(|c| *c == descriptor.category)
            && self.source.is_none_or(|s| s == descriptor.source)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Entry {
    descriptor: ToolDescriptor,
    handler: BoxToolHandler,
}

pub struct ToolRegistry {
    tools: DashMap<String, Entry>,
    metrics: Arc<MetricsCollector>,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
}

impl ToolRegistry {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            tools: DashMap::new(),
            metrics,
            initialized: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Add a tool. An existing tool with the same name is replaced.
    pub fn register(&self, descriptor: ToolDescriptor, handler: BoxToolHandler) {
        let name = descriptor.name.clone();
        let source = descriptor.source;
        let previous = self.tools.insert(name.clone(), Entry { descriptor, handler });
        match previous {
            Some(old) => tracing::warn!(
                tool = %name,
                old_source = %old.descriptor.source,
                new_source = %source,
                "tool already registered, overwriting"
            ),
            None => tracing::debug!(tool = %name, source = %source, "tool registered"),
        }
    }

    /// Load every provider once. Later calls return `Ok(0)` without touching
    /// the catalog. A failing provider is logged and skipped so one
    /// unreachable backend does not hide the others.
    pub async fn initialize(
        &self,
        providers: &[Arc<dyn ToolProvider>],
    ) -> Result<usize, ToolError> {
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            tracing::debug!("tool registry already initialized");
            return Ok(0);
        }

        let mut registered = 0;
        for provider in providers {
            match provider.provide().await {
                Ok(tools) => {
                    let count = tools.len();
                    for tool in tools {
                        self.register(tool.descriptor, tool.handler);
                    }
                    tracing::info!(provider = provider.name(), count, "provider tools registered");
                    registered += count;
                }
                Err(e) => {
                    tracing::error!(provider = provider.name(), error = %e, "tool provider failed to load");
                    self.metrics.record_error("registration", &e.to_string(), None);
                }
            }
        }

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(total = self.tools.len(), "tool registry initialized");
        Ok(registered)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Validate and run a tool.
    ///
    /// Returns `Err` only for failures detected before the handler runs
    /// (unknown, disabled, invalid parameters). Everything the handler does,
    /// including errors, timeouts and panics, comes back as a [`ToolResult`].
    pub async fn execute(&self, name: &str, params: Value) -> Result<ToolResult, ToolError> {
        let started = Instant::now();

        let (descriptor, handler) = match self.tools.get(name) {
            Some(entry) => (entry.descriptor.clone(), entry.handler.clone()),
            None => return Err(self.reject(ToolError::NotFound(name.to_string()))),
        };
        if !descriptor.enabled {
            return Err(self.reject(ToolError::Disabled(name.to_string())));
        }

        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(self.reject(ToolError::Validation {
                    tool: name.to_string(),
                    issues: vec![ParamIssue::WrongType {
                        name: "params".to_string(),
                        expected: ParamType::Object,
                        actual: json_type_name(&other).to_string(),
                    }],
                }));
            }
        };
        let issues = descriptor.schema.validate(&params);
        if !issues.is_empty() {
            return Err(self.reject(ToolError::Validation {
                tool: name.to_string(),
                issues,
            }));
        }
        descriptor.schema.apply_defaults(&mut params);

        let call = AssertUnwindSafe(handler.call(params)).catch_unwind();
        let outcome = match descriptor.timeout() {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Ok(Err(ToolError::Transport(TransportError::Timeout {
                    method: name.to_string(),
                    after_ms: limit.as_millis() as u64,
                }))),
            },
            None => call.await,
        };

        let elapsed = started.elapsed();
        let result = match outcome {
            Ok(Ok(payload)) => ToolResult::success(name, payload, elapsed),
            Ok(Err(err)) => ToolResult::failure(name, err.to_string(), err.kind(), elapsed),
            Err(_) => {
                ToolResult::failure(name, "tool handler panicked".to_string(), "panic", elapsed)
            }
        }
        .with_metadata("source", descriptor.source.to_string())
        .with_metadata("category", descriptor.category.clone());

        self.metrics.record_tool_call(name, elapsed, result.success);
        if result.success {
            tracing::info!(tool = name, elapsed_ms = result.elapsed_ms, "tool executed");
        } else {
            let message = result.error.as_deref().unwrap_or_default();
            let kind = result
                .metadata
                .get("error_kind")
                .and_then(Value::as_str)
                .unwrap_or("execution");
            self.metrics.record_error(kind, message, Some(name));
            tracing::warn!(
                tool = name,
                elapsed_ms = result.elapsed_ms,
                error = message,
                "tool execution failed"
            );
        }
        Ok(result)
    }

    /// Log and count a pre-execution failure.
    fn reject(&self, err: ToolError) -> ToolError {
        tracing::warn!(error = %err, kind = err.kind(), "tool invocation rejected");
        let tool = match &err {
            ToolError::NotFound(t) | ToolError::Disabled(t) => Some(t.as_str()),
            ToolError::Validation { tool, .. } | ToolError::Execution { tool, .. } => Some(tool.as_str()),
            _ => None,
        };
        self.metrics.record_error(err.kind(), &err.to_string(), tool);
        err
    }

    pub fn enable(&self, name: &str) -> Result<(), ToolError> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<(), ToolError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), ToolError> {
        let mut entry = self
            .tools
            .get_mut(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        entry.descriptor.enabled = enabled;
        tracing::info!(tool = name, enabled, "tool availability changed");
        Ok(())
    }

    /// Descriptors matching `filter`, sorted by name.
    pub fn list(&self, filter: &ToolFilter) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self
            .tools
            .iter()
            .filter(|e| filter.matches(&e.descriptor))
            .map(|e| e.descriptor.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|e| e.descriptor.clone())
    }

    /// JSON-schema rendering of a tool's parameters.
    pub fn tool_schema(&self, name: &str) -> Option<Value> {
        self.tools.get(name).map(|e| e.descriptor.schema.to_json_schema())
    }

    pub fn categories(&self) -> BTreeSet<String> {
        self.tools.iter().map(|e| e.descriptor.category.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
