//! Tool trait: the abstraction over invocable capabilities.
//!
//! Tools are what give the agent the ability to act: look things up, call
//! services, or delegate to another agent. Each tool is addressed by a unique
//! name, advertises a [`ToolSpec`], and exposes a single `invoke` operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::event::EventHandler;
use crate::message::{Message, ToolResult, ToolUse};
use crate::model::Model;
use crate::state::RequestState;

/// Invocation metadata sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique within a registry
    pub name: String,

    /// What the tool does
    pub description: String,

    /// JSON Schema of the tool's input
    pub input_schema: serde_json::Value,
}

impl ToolSpec {
    /// Check required fields and fill in the schema skeleton
    /// (`type`, `properties`, `required`) where it is missing.
    pub fn normalized(mut self) -> Result<Self, ToolError> {
        if self.name.is_empty() {
            return Err(ToolError::InvalidArguments(
                "tool spec missing required field: name".into(),
            ));
        }
        if self.description.is_empty() {
            return Err(ToolError::InvalidArguments(format!(
                "tool spec '{}' missing required field: description",
                self.name
            )));
        }

        if self.input_schema.is_null() {
            self.input_schema = serde_json::json!({});
        }
        let Some(schema) = self.input_schema.as_object_mut() else {
            return Err(ToolError::InvalidArguments(format!(
                "tool spec '{}' input schema must be a JSON object",
                self.name
            )));
        };
        schema.entry("type").or_insert_with(|| "object".into());
        schema
            .entry("properties")
            .or_insert_with(|| serde_json::json!({}));
        schema
            .entry("required")
            .or_insert_with(|| serde_json::json!([]));

        Ok(self)
    }
}

/// How the model may choose among tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides whether to call a tool
    #[default]
    Auto,
    /// The model must call some tool
    Any,
    /// The model must call this tool
    Tool { name: String },
}

/// The capability descriptor handed to the model on every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub tools: Vec<ToolSpec>,

    #[serde(default)]
    pub tool_choice: ToolChoice,
}

impl ToolConfig {
    /// Whether a tool with this name is advertised.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|spec| spec.name == name)
    }
}

/// Everything a tool can see while it runs.
pub struct ToolContext<'a> {
    /// The conversation history at the time of the call
    pub messages: &'a [Message],

    /// The model driving the conversation
    pub model: &'a dyn Model,

    pub system_prompt: Option<&'a str>,

    pub tool_config: &'a ToolConfig,

    /// Observer for lifecycle notifications
    pub handler: &'a dyn EventHandler,

    /// Per-call state; tools may set the stop flag here
    pub request_state: &'a RequestState,
}

/// The core Tool trait.
///
/// `invoke` must not fail for ordinary input-validation problems; those
/// should come back as an error-status [`ToolResult`]. Returning `Err` is
/// treated as a fault of the tool itself, which the execution engine turns
/// into an error result without disturbing sibling invocations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "echo", "research_assistant").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// A short label for the kind of tool (for display and logging).
    fn tool_type(&self) -> &str {
        "function"
    }

    /// Execute one tool use.
    async fn invoke(
        &self,
        tool_use: &ToolUse,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolResult, ToolError>;

    /// The spec advertised to the model.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of available tools, keyed by name.
///
/// The event loop uses it to:
/// 1. Build the capability descriptor sent to the model
/// 2. Resolve tools when the model requests them
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "Tool already registered, overwriting");
        }
        debug!(tool = %name, tool_type = tool.tool_type(), "Registered tool");
        self.tools.insert(name, tool);
    }

    /// Register many tools at once, returning their names in order.
    pub fn process_tools(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Vec<String> {
        tools
            .into_iter()
            .map(|tool| {
                let name = tool.name().to_string();
                self.register(tool);
                name
            })
            .collect()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// List all registered tool names (sorted).
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validated specs of all tools. Tools with invalid specs are skipped.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .filter_map(|tool| match tool.spec().normalized() {
                Ok(spec) => Some(spec),
                Err(e) => {
                    warn!(tool = %tool.name(), error = %e, "Tool spec validation failed");
                    None
                }
            })
            .collect()
    }

    /// The capability descriptor for all registered tools.
    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            tools: self.specs(),
            tool_choice: ToolChoice::Auto,
        }
    }

    /// Remove every tool.
    pub fn clear(&mut self) {
        self.tools.clear();
    }
}
