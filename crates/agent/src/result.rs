//! The value a top-level agent call resolves to.

use std::fmt;
use std::sync::Arc;

use tendril_core::message::{Message, ToolUse};
use tendril_core::model::StopReason;
use tendril_core::state::RequestState;

use crate::metrics::CycleMetrics;

#[derive(Debug, Clone)]
pub struct AgentResult {
    pub stop_reason: StopReason,

    /// The final assistant turn
    pub message: Message,

    /// The agent's lifetime metrics as of the end of the call
    pub metrics: CycleMetrics,

    pub request_state: Arc<RequestState>,
}

impl AgentResult {
    pub fn new(
        stop_reason: StopReason,
        message: Message,
        metrics: CycleMetrics,
        request_state: Arc<RequestState>,
    ) -> Self {
        Self {
            stop_reason,
            message,
            metrics,
            request_state,
        }
    }

    /// All text of the final turn.
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn tool_uses(&self) -> Vec<&ToolUse> {
        self.message.tool_uses()
    }

    /// The whole result as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "stop_reason": self.stop_reason,
            "message": self.message,
            "metrics": self.metrics,
            "request_state": self.request_state.snapshot(),
        })
    }
}

impl fmt::Display for AgentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
