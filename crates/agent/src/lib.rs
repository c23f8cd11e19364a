//! The Tendril event loop.
//!
//! An [`Agent`] turns a prompt into a sequence of model cycles:
//!
//! 1. **Stream** a model turn, assembling content blocks as events arrive
//!    (throttled requests are retried with exponential backoff)
//! 2. **If the model asked for tools**: run them, append their results, and
//!    cycle again
//! 3. **Otherwise** the turn is the answer
//!
//! Context overflow is relieved by dropping early history and retrying. After
//! every call the conversation manager trims the history to its window.

pub mod agent;
pub mod agent_tool;
pub mod conversation;
pub mod cycle;
pub mod executor;
pub mod function_tool;
pub mod metrics;
pub mod result;
pub mod retry;
pub mod streaming;

#[cfg(test)]
mod test_helpers;

pub use agent::{Agent, AgentBuilder, AgentStream, AgentStreamItem, ToolHandle};
pub use agent_tool::{AgentFactory, AgentTool, AgentToolConfig, agent_tools};
pub use conversation::{
    ConversationManager, NullConversationManager, SlidingWindowConversationManager,
};
pub use cycle::{CycleConfig, CycleResult, clean_orphaned_tool_uses, event_loop_cycle};
pub use executor::ToolExecutor;
pub use function_tool::{FunctionTool, ToolOutput};
pub use metrics::{CycleMetrics, ToolMetrics};
pub use result::AgentResult;
pub use retry::{RetryPolicy, stream_with_retry};
pub use streaming::{StreamAssembler, StreamOutcome, stream_messages};
