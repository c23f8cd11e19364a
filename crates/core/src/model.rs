//! Model trait: the abstraction over foundation-model providers.
//!
//! A Model knows how to send a conversation to a provider and hand back the
//! response as a stream of [`StreamEvent`]s. The wire encoding of any specific
//! provider lives behind this trait; the event loop only sees the event
//! vocabulary defined here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ModelError;
use crate::message::{Message, Role};
use crate::tool::ToolSpec;

/// One request to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The ordered conversation history
    pub messages: Vec<Message>,

    /// Optional system instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Tools the model may invoke
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_specs: Vec<ToolSpec>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    GuardrailIntervened,
    ContentFiltered,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Latency reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Opening of a tool-use content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseStart {
    pub tool_use_id: String,
    pub name: String,
}

/// Incremental content inside an open block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentDelta {
    /// More text for the current text block
    Text(String),
    /// A fragment of a tool use's JSON input
    ToolUseInput(String),
}

/// The provider event vocabulary consumed by the streaming assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        role: Role,
    },
    /// Opens a block; `tool_use` is set for invocation blocks and absent for text.
    ContentBlockStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use: Option<ToolUseStart>,
    },
    ContentBlockDelta {
        delta: ContentDelta,
    },
    ContentBlockStop,
    MessageStop {
        stop_reason: StopReason,
    },
    Metadata {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metrics: Option<StreamMetrics>,
    },
    /// Replace content with a fixed notice, effective immediately.
    RedactContent {
        /// Replaces the content of the most recent user turn
        #[serde(default, skip_serializing_if = "Option::is_none")]
        redact_user_content_message: Option<String>,
        /// Replaces the content of the turn being streamed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        redact_assistant_content_message: Option<String>,
    },
}

/// The receiving end of a model response stream.
///
/// The provider closes the channel when the response is complete.
pub type EventStream = mpsc::Receiver<Result<StreamEvent, ModelError>>;

/// The core Model trait.
///
/// The event loop calls `converse()` without knowing which provider sits
/// behind it. Throttling and context overflow must be reported as
/// [`ModelError::Throttled`] and [`ModelError::ContextWindowOverflow`],
/// either from `converse()` itself or as an item on the stream.
#[async_trait]
pub trait Model: Send + Sync {
    /// Identifier of the underlying model (e.g., "claude-sonnet").
    fn model_id(&self) -> &str;

    /// Start streaming a response for `request`.
    async fn converse(&self, request: ModelRequest) -> Result<EventStream, ModelError>;
}
