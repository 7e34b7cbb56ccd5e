//! In-process metrics collector.
//!
//! One `MetricsCollector` is built at startup and shared by `Arc` between the
//! registry, the memory service and whoever serves snapshots. All state sits
//! behind a single `std::sync::Mutex`; every update is O(1) and the lock is
//! never held across an await. Recording never fails: a poisoned lock is
//! recovered and a disabled collector ignores updates.
//!
//! Queries and errors are counted separately. A query is a call that reached
//! execution (`record_query`, `record_tool_call`) and only those feed
//! `success_rate`. `total_errors` counts every `record_error`, including
//! rejections that never ran and memory failures.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use blitz_types::config::MetricsConfig;
use blitz_types::metrics::{
    DURATION_BUCKETS_SECS, ErrorRecord, MemoryOp, MemoryOpStats, MetricsSnapshot, ToolStats,
    ToolUsage,
};
use chrono::Utc;

#[derive(Default)]
struct ToolCounters {
    calls: u64,
    successes: u64,
    errors: u64,
    total_ms: f64,
    buckets: [u64; DURATION_BUCKETS_SECS.len() + 1],
}

#[derive(Default)]
struct MemoryCounters {
    count: u64,
    errors: u64,
    total_ms: f64,
}

#[derive(Default)]
struct Inner {
    total_queries: u64,
    failed_queries: u64,
    total_errors: u64,
    response_ms: VecDeque<f64>,
    token_window: VecDeque<u64>,
    total_tokens: u64,
    tokens_by_type: BTreeMap<String, u64>,
    errors_by_kind: BTreeMap<String, u64>,
    recent_errors: VecDeque<ErrorRecord>,
    tools: HashMap<String, ToolCounters>,
    active_sessions: HashSet<String>,
    memory: BTreeMap<MemoryOp, MemoryCounters>,
}

/// Process-wide counters and rolling windows.
pub struct MetricsCollector {
    config: MetricsConfig,
    started: Mutex<Instant>,
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            started: Mutex::new(Instant::now()),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A collector that records nothing.
    pub fn disabled() -> Self {
        Self::new(MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn lock(&self) -> Option<MutexGuard<'_, Inner>> {
        if !self.config.enabled {
            return None;
        }
        Some(self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push_bounded<T>(window: &mut VecDeque<T>, cap: usize, value: T) {
        if cap == 0 {
            return;
        }
        while window.len() >= cap {
            window.pop_front();
        }
        window.push_back(value);
    }

    /// Count one agent query and its latency.
    pub fn record_query(&self, elapsed: Duration, success: bool) {
        let window = self.config.window_size;
        if let Some(mut inner) = self.lock() {
            inner.total_queries += 1;
            if !success {
                inner.failed_queries += 1;
            }
            Self::push_bounded(&mut inner.response_ms, window, millis(elapsed));
        }
    }

    /// Count one tool invocation. Feeds the query counters as well.
    pub fn record_tool_call(&self, tool: &str, elapsed: Duration, success: bool) {
        let window = self.config.window_size;
        if let Some(mut inner) = self.lock() {
            inner.total_queries += 1;
            if !success {
                inner.failed_queries += 1;
            }
            let ms = millis(elapsed);
            Self::push_bounded(&mut inner.response_ms, window, ms);

            let counters = inner.tools.entry(tool.to_string()).or_default();
            counters.calls += 1;
            if success {
                counters.successes += 1;
            } else {
                counters.errors += 1;
            }
            counters.total_ms += ms;
            let secs = elapsed.as_secs_f64();
            let bucket = DURATION_BUCKETS_SECS
                .iter()
                .position(|upper| secs <= *upper)
                .unwrap_or(DURATION_BUCKETS_SECS.len());
            counters.buckets[bucket] += 1;
        }
    }

    /// Record a failure. `tool` is set when the failure came from a tool call.
    pub fn record_error(&self, kind: &str, message: &str, tool: Option<&str>) {
        let cap = self.config.recent_errors;
        if let Some(mut inner) = self.lock() {
            inner.total_errors += 1;
            *inner.errors_by_kind.entry(kind.to_string()).or_default() += 1;
            Self::push_bounded(
                &mut inner.recent_errors,
                cap,
                ErrorRecord {
                    timestamp: Utc::now(),
                    kind: kind.to_string(),
                    message: message.to_string(),
                    tool: tool.map(str::to_string),
                },
            );
        }
    }

    /// Add token usage of a given type (e.g. "input", "output", "embedding").
    pub fn record_tokens(&self, token_type: &str, count: u64) {
        let window = self.config.window_size;
        if let Some(mut inner) = self.lock() {
            inner.total_tokens += count;
            *inner.tokens_by_type.entry(token_type.to_string()).or_default() += count;
            Self::push_bounded(&mut inner.token_window, window, count);
        }
    }

    pub fn record_memory_op(&self, op: MemoryOp, elapsed: Duration, success: bool) {
        if let Some(mut inner) = self.lock() {
            let counters = inner.memory.entry(op).or_default();
            counters.count += 1;
            if !success {
                counters.errors += 1;
            }
            counters.total_ms += millis(elapsed);
        }
    }

    pub fn session_started(&self, session_id: &str) {
        if let Some(mut inner) = self.lock() {
            inner.active_sessions.insert(session_id.to_string());
        }
    }

    pub fn session_ended(&self, session_id: &str) {
        if let Some(mut inner) = self.lock() {
            inner.active_sessions.remove(session_id);
        }
    }

    /// Point-in-time view. Does not mutate collector state.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime_secs = self
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            .as_secs();
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let mut sorted: Vec<f64> = inner.response_ms.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let avg_response_time_ms = mean(&sorted);

        let success_rate = if inner.total_queries == 0 {
            1.0
        } else {
            let ok = inner.total_queries.saturating_sub(inner.failed_queries);
            ok as f64 / inner.total_queries as f64
        };

        let avg_tokens_per_query = if inner.token_window.is_empty() {
            0.0
        } else {
            inner.token_window.iter().sum::<u64>() as f64 / inner.token_window.len() as f64
        };

        let mut top_tools: Vec<ToolUsage> = inner
            .tools
            .iter()
            .map(|(name, c)| ToolUsage {
                name: name.clone(),
                calls: c.calls,
            })
            .collect();
        top_tools.sort_by(|a, b| b.calls.cmp(&a.calls).then_with(|| a.name.cmp(&b.name)));
        top_tools.truncate(self.config.top_tools);

        let tools = inner
            .tools
            .iter()
            .map(|(name, c)| {
                let mut cumulative = 0;
                let histogram = c
                    .buckets
                    .iter()
                    .map(|n| {
                        cumulative += n;
                        cumulative
                    })
                    .collect();
                let stats = ToolStats {
                    calls: c.calls,
                    successes: c.successes,
                    errors: c.errors,
                    total_duration_ms: c.total_ms,
                    avg_duration_ms: if c.calls == 0 {
                        0.0
                    } else {
                        c.total_ms / c.calls as f64
                    },
                    histogram,
                };
                (name.clone(), stats)
            })
            .collect();

        let memory = inner
            .memory
            .iter()
            .map(|(op, c)| {
                let stats = MemoryOpStats {
                    count: c.count,
                    errors: c.errors,
                    avg_duration_ms: if c.count == 0 {
                        0.0
                    } else {
                        c.total_ms / c.count as f64
                    },
                };
                (*op, stats)
            })
            .collect();

        MetricsSnapshot {
            total_queries: inner.total_queries,
            failed_queries: inner.failed_queries,
            total_errors: inner.total_errors,
            success_rate,
            avg_response_time_ms,
            p50_response_time_ms: percentile(&sorted, 0.50),
            p95_response_time_ms: percentile(&sorted, 0.95),
            total_tokens: inner.total_tokens,
            avg_tokens_per_query,
            tokens_by_type: inner.tokens_by_type.clone(),
            errors_by_kind: inner.errors_by_kind.clone(),
            active_sessions: inner.active_sessions.len(),
            uptime_secs,
            top_tools,
            recent_errors: inner.recent_errors.iter().rev().cloned().collect(),
            tools,
            memory,
        }
    }

    /// Clear every counter and restart the uptime clock.
    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Inner::default();
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        tracing::info!("metrics reset");
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
