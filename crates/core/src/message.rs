//! Conversation turns and their content blocks.
//!
//! These are the core value objects that flow through the whole system:
//! the caller's prompt becomes a user [`Message`], the model answers with an
//! assistant [`Message`] that may carry [`ToolUse`] requests, and the tool
//! results travel back to the model in a user [`Message`] of [`ToolResult`]s.

use serde::{Deserialize, Serialize};

/// The role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller (prompts and tool results)
    User,
    /// The model
    Assistant,
}

/// One role-tagged, ordered bundle of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// A user turn holding a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::Text(text.into())])
    }

    /// An assistant turn holding a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::Text(text.into())])
    }

    /// A user turn carrying tool results, in the given order.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::new(
            Role::User,
            results.into_iter().map(ContentBlock::ToolResult).collect(),
        )
    }

    /// Concatenation of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect()
    }

    /// All tool-use requests in this turn, in order.
    pub fn tool_uses(&self) -> Vec<&ToolUse> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse(tool_use) => Some(tool_use),
                _ => None,
            })
            .collect()
    }

    /// Whether this turn carries guard content or a cache point.
    ///
    /// Such turns are protected from routine history trimming.
    pub fn is_protected(&self) -> bool {
        self.content.iter().any(|block| {
            matches!(
                block,
                ContentBlock::GuardContent(_) | ContentBlock::CachePoint(_)
            )
        })
    }
}

/// A single block of turn content. Exactly one variant per block.
///
/// Only text, tool uses and tool results are interpreted by the event loop;
/// the media and annotation variants are carried through opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentBlock {
    Text(String),
    ToolUse(ToolUse),
    ToolResult(ToolResult),
    Image(MediaContent),
    Document(MediaContent),
    Reasoning(ReasoningContent),
    GuardContent(GuardContent),
    CachePoint(CachePoint),
}

impl ContentBlock {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// A model-issued request to execute a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    /// Unique per invocation. Empty means the request is invalid.
    pub id: String,

    /// Tool name. Empty means the request is invalid.
    pub name: String,

    /// Structured input. `Null` marks an input that could not be resolved.
    #[serde(default)]
    pub input: serde_json::Value,
}

impl ToolUse {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// A request with both an id and a name can be executed.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && !self.name.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    Success,
    Error,
}

/// The outcome of one [`ToolUse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The id of the originating tool use.
    pub tool_use_id: String,
    pub status: ToolResultStatus,
    pub content: Vec<ToolResultContent>,
}

impl ToolResult {
    /// A successful result with a single text block.
    pub fn success(tool_use_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            status: ToolResultStatus::Success,
            content: vec![ToolResultContent::Text(text.into())],
        }
    }

    /// A failed result with a single text block describing the failure.
    pub fn error(tool_use_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            status: ToolResultStatus::Error,
            content: vec![ToolResultContent::Text(text.into())],
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolResultStatus::Error
    }

    /// Concatenation of all text payloads.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolResultContent::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// One payload inside a [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultContent {
    Text(String),
    Json(serde_json::Value),
    Image(MediaContent),
    Document(MediaContent),
}

/// Binary or referenced media (image, document, video).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaContent {
    /// e.g. "png", "pdf"
    pub format: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Base64 payload or a location URI.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningContent {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardContent {
    pub text: String,

    #[serde(default)]
    pub qualifiers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePoint {
    #[serde(rename = "type")]
    pub kind: String,
}
