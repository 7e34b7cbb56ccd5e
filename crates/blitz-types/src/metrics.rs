//! Point-in-time metrics views produced by the collector.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Upper bounds (seconds) of the per-tool duration histogram buckets.
pub const DURATION_BUCKETS_SECS: [f64; 8] = [0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Memory operations tracked by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryOp {
    Store,
    Recall,
    Cleanup,
}

/// A recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

/// Aggregates for a single tool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolStats {
    pub calls: u64,
    pub successes: u64,
    pub errors: u64,
    pub total_duration_ms: f64,
    pub avg_duration_ms: f64,
    /// Cumulative counts per bucket in [`DURATION_BUCKETS_SECS`], plus a
    /// final overflow bucket.
    pub histogram: Vec<u64>,
}

/// Aggregates for one memory operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryOpStats {
    pub count: u64,
    pub errors: u64,
    pub avg_duration_ms: f64,
}

/// Entry in the tool usage ranking.
#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    pub name: String,
    pub calls: u64,
}

/// Everything `MetricsCollector::snapshot` reports.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    /// Queries that ran and failed. `success_rate` is derived from this.
    pub failed_queries: u64,
    /// Every recorded error, including rejected calls and memory failures.
    pub total_errors: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub p50_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub total_tokens: u64,
    pub avg_tokens_per_query: f64,
    pub tokens_by_type: BTreeMap<String, u64>,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub active_sessions: usize,
    pub uptime_secs: u64,
    pub top_tools: Vec<ToolUsage>,
    /// Newest first, bounded by `MetricsConfig::recent_errors`.
    pub recent_errors: Vec<ErrorRecord>,
    pub tools: BTreeMap<String, ToolStats>,
    pub memory: BTreeMap<MemoryOp, MemoryOpStats>,
}
