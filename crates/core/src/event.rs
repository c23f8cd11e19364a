//! Lifecycle notifications and the observers that receive them.
//!
//! The event loop reports everything it does through one [`EventHandler`]:
//! streamed deltas, completed turns, tool executions, throttling and forced
//! stops. Handlers are passed explicitly with each call; several can be
//! composed with [`CompositeHandler`] and run in registration order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::message::{Message, Role, ToolResult, ToolUse};
use crate::model::StopReason;

/// All lifecycle notifications emitted during an agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A top-level call is starting.
    InitEventLoop,

    /// A new cycle (model round-trip) is starting.
    CycleStart { cycle_id: String },

    /// The model began a turn.
    MessageStart { role: Role },

    /// Partial text streamed from the model.
    TextDelta { text: String },

    /// The model opened a tool-use block.
    ToolUseStart { tool_use_id: String, name: String },

    /// A fragment of the tool-use input.
    ToolUseDelta { input: String },

    /// A tool-use block was parsed successfully.
    ToolUseComplete { tool_use: ToolUse },

    /// The model finished its turn.
    MessageStop { stop_reason: StopReason },

    /// A turn was appended to the conversation history.
    Message { message: Message },

    ToolExecutionStart { tool_use: ToolUse },

    ToolExecutionComplete { tool_use: ToolUse, result: ToolResult },

    /// The tool itself failed; an error result was substituted.
    ToolExecutionError { tool_use: ToolUse, error: String },

    /// The model throttled us; retrying after `retry_in_ms`.
    Throttled {
        error: String,
        attempt: u32,
        max_attempts: u32,
        retry_in_ms: u64,
    },

    /// The loop is aborting with an error.
    ForceStop { reason: String },
}

impl AgentEvent {
    /// Stable name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::InitEventLoop => "init_event_loop",
            Self::CycleStart { .. } => "cycle_start",
            Self::MessageStart { .. } => "message_start",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolUseStart { .. } => "tool_use_start",
            Self::ToolUseDelta { .. } => "tool_use_delta",
            Self::ToolUseComplete { .. } => "tool_use_complete",
            Self::MessageStop { .. } => "message_stop",
            Self::Message { .. } => "message",
            Self::ToolExecutionStart { .. } => "tool_execution_start",
            Self::ToolExecutionComplete { .. } => "tool_execution_complete",
            Self::ToolExecutionError { .. } => "tool_execution_error",
            Self::Throttled { .. } => "throttled",
            Self::ForceStop { .. } => "force_stop",
        }
    }
}

/// An observer of lifecycle notifications.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &AgentEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&AgentEvent) + Send + Sync,
{
    fn handle(&self, event: &AgentEvent) {
        self(event)
    }
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHandler;

impl EventHandler for NullHandler {
    fn handle(&self, _event: &AgentEvent) {}
}

/// Renders lifecycle events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &AgentEvent) {
        match event {
            AgentEvent::TextDelta { text } => debug!(text = %text, "Model delta"),
            AgentEvent::MessageStop { stop_reason } => {
                debug!(stop_reason = ?stop_reason, "Model turn finished")
            }
            AgentEvent::ToolExecutionStart { tool_use } => {
                info!(tool = %tool_use.name, tool_use_id = %tool_use.id, "Executing tool")
            }
            AgentEvent::ToolExecutionComplete { tool_use, result } => info!(
                tool = %tool_use.name,
                status = ?result.status,
                "Tool completed"
            ),
            AgentEvent::ToolExecutionError { tool_use, error } => {
                warn!(tool = %tool_use.name, error = %error, "Tool error")
            }
            AgentEvent::Throttled {
                attempt,
                max_attempts,
                retry_in_ms,
                ..
            } => warn!(
                attempt,
                max_attempts,
                retry_in_ms,
                "Rate limited, retrying"
            ),
            AgentEvent::ForceStop { reason } => warn!(reason = %reason, "Event loop stopped"),
            _ => {}
        }
    }
}

/// Fans each event out to several handlers in registration order.
#[derive(Clone, Default)]
pub struct CompositeHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl CompositeHandler {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self { handlers }
    }

    pub fn push(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl EventHandler for CompositeHandler {
    fn handle(&self, event: &AgentEvent) {
        for handler in &self.handlers {
            handler.handle(event);
        }
    }
}

/// Forwards every event into an unbounded channel.
///
/// The receiver sees the channel close once every clone of the handler has
/// been dropped.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelHandler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventHandler for ChannelHandler {
    fn handle(&self, event: &AgentEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(event.clone());
    }
}
