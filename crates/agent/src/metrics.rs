//! Counters accumulated across every cycle an agent runs.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tendril_core::model::Usage;

/// Aggregated outcome of one tool's executions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub call_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_time_ms: u64,
}

impl ToolMetrics {
    fn record(&mut self, success: bool, elapsed: Duration) {
        self.call_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        self.total_time_ms += elapsed.as_millis() as u64;
    }

    pub fn success_rate(&self) -> f64 {
        if self.call_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.call_count as f64
    }

    pub fn average_time_ms(&self) -> f64 {
        if self.call_count == 0 {
            return 0.0;
        }
        self.total_time_ms as f64 / self.call_count as f64
    }
}

/// Lifetime metrics of an agent.
///
/// Owned by the agent and mutated in place by each cycle, so every total is
/// monotonic for as long as the agent lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    /// Model round-trips
    pub cycles: u64,

    /// Token usage summed over every streamed turn
    pub usage: Usage,

    /// Provider-reported latency, summed
    pub latency_ms: u64,

    /// Wall-clock time spent inside cycles
    pub cycle_time_ms: u64,

    /// Tool executions that ran to completion
    pub tool_executions: u64,

    pub tool_metrics: BTreeMap<String, ToolMetrics>,
}

impl CycleMetrics {
    pub fn add_usage(&mut self, usage: &Usage) {
        self.usage.input_tokens += usage.input_tokens;
        self.usage.output_tokens += usage.output_tokens;
        self.usage.total_tokens += usage.total_tokens;
    }

    pub fn add_latency(&mut self, latency_ms: u64) {
        self.latency_ms += latency_ms;
    }

    pub fn add_cycle_time(&mut self, elapsed: Duration) {
        self.cycle_time_ms += elapsed.as_millis() as u64;
    }

    /// Record one tool execution under `tool_name`.
    pub fn record_tool(&mut self, tool_name: &str, success: bool, elapsed: Duration) {
        self.tool_executions += 1;
        self.tool_metrics
            .entry(tool_name.to_string())
            .or_default()
            .record(success, elapsed);
    }

    /// A compact JSON overview, suitable for logging.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "cycles": self.cycles,
            "input_tokens": self.usage.input_tokens,
            "output_tokens": self.usage.output_tokens,
            "total_tokens": self.usage.total_tokens,
            "latency_ms": self.latency_ms,
            "tool_executions": self.tool_executions,
            "tools": self.tool_metrics.iter().map(|(name, m)| {
                (name.clone(), serde_json::json!({
                    "call_count": m.call_count,
                    "success_rate": m.success_rate(),
                    "average_time_ms": m.average_time_ms(),
                }))
            }).collect::<serde_json::Map<_, _>>(),
        })
    }
}
