//! # Tendril Core
//!
//! Domain types, traits, and error definitions for the Tendril agent event loop.
//! This crate carries no orchestration logic. It defines the domain model
//! that the other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the event loop is a trait here:
//! - [`Model`]: streams a model response as [`StreamEvent`]s
//! - [`Tool`]: one invocable capability
//! - [`EventHandler`]: observes lifecycle notifications
//!
//! Implementations live in their own crates, which keeps the dependency graph
//! pointing inward and makes mocking trivial.

pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod state;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ModelError, Result, ToolError};
pub use event::{
    AgentEvent, ChannelHandler, CompositeHandler, EventHandler, LoggingHandler, NullHandler,
};
pub use message::{
    ContentBlock, Message, Role, ToolResult, ToolResultContent, ToolResultStatus, ToolUse,
};
pub use model::{
    ContentDelta, EventStream, Model, ModelRequest, StopReason, StreamEvent, StreamMetrics, Usage,
};
pub use state::RequestState;
pub use tool::{Tool, ToolChoice, ToolConfig, ToolContext, ToolRegistry, ToolSpec};
