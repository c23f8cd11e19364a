//! Shared helpers for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tendril_core::error::ToolError;
use tendril_core::event::{AgentEvent, EventHandler};
use tendril_core::message::{ToolResult, ToolUse};
use tendril_core::tool::{Tool, ToolContext, ToolRegistry};

use crate::function_tool::{FunctionTool, ToolOutput};

/// Records every event it sees.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<AgentEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events().iter().map(AgentEvent::event_type).collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.types().iter().filter(|t| **t == event_type).count()
    }

    /// `(attempt, retry_in_ms)` of every throttling notice.
    pub fn throttles(&self) -> Vec<(u32, u64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AgentEvent::Throttled {
                    attempt,
                    retry_in_ms,
                    ..
                } => Some((attempt, retry_in_ms)),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for EventLog {
    fn handle(&self, event: &AgentEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A tool named `echo` that returns its input.
pub fn echo_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::sync("echo", "Echoes back the input", |input| {
        Ok(ToolOutput::Raw(input))
    }))
}

pub fn registry_of(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.process_tools(tools);
    registry
}

/// A tool named `explode` that always faults.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "explode"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn invoke(
        &self,
        tool_use: &ToolUse,
        _ctx: &ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: tool_use.name.clone(),
            reason: "kaboom".into(),
        })
    }
}

#[derive(Default)]
struct ProbeState {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<String>>,
}

/// Sleeps for `input.ms` milliseconds while tracking how many invocations overlap.
#[derive(Clone)]
pub struct ConcurrencyProbe {
    name: String,
    state: Arc<ProbeState>,
}

impl ConcurrencyProbe {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::default(),
        }
    }

    pub fn tool(&self) -> Arc<dyn Tool> {
        Arc::new(self.clone())
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.state.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for ConcurrencyProbe {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Sleeps, then reports"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {"ms": {"type": "integer"}}})
    }
    async fn invoke(
        &self,
        tool_use: &ToolUse,
        _ctx: &ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        self.state.started.lock().unwrap().push(tool_use.id.clone());
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let ms = tool_use.input["ms"].as_u64().unwrap_or(10);
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ToolResult::success(&tool_use.id, format!("slept {ms}ms")))
    }
}
