//! Agents exposed as tools.
//!
//! An [`AgentTool`] takes a single string parameter, runs one full call on an
//! agent with it and hands back the agent's answer. To the outer loop this is
//! an ordinary tool execution.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tendril_core::error::{Result, ToolError};
use tendril_core::message::{ToolResult, ToolResultContent, ToolResultStatus, ToolUse};
use tendril_core::tool::{Tool, ToolContext};
use tokio::sync::Mutex;
use tracing::debug;

use crate::agent::Agent;
use crate::result::AgentResult;

/// Builds a fresh agent for every invocation.
pub type AgentFactory = Arc<dyn Fn() -> Result<Agent> + Send + Sync>;

const DEFAULT_PARAMETER: &str = "query";

enum AgentSource {
    Factory(AgentFactory),
    Shared(Arc<Mutex<Agent>>),
}

pub struct AgentTool {
    name: String,
    description: String,
    parameter_name: String,
    parameter_description: Option<String>,
    return_full_result: bool,
    source: AgentSource,
}

impl AgentTool {
    /// Each invocation runs on a newly built agent with an empty history.
    pub fn from_factory<F>(name: impl Into<String>, description: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Agent> + Send + Sync + 'static,
    {
        Self::with_source(name, description, AgentSource::Factory(Arc::new(factory)))
    }

    /// Every invocation runs on the same agent, which keeps its history.
    pub fn stateful(
        name: impl Into<String>,
        description: impl Into<String>,
        agent: Arc<Mutex<Agent>>,
    ) -> Self {
        Self::with_source(name, description, AgentSource::Shared(agent))
    }

    fn with_source(name: impl Into<String>, description: impl Into<String>, source: AgentSource) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_name: DEFAULT_PARAMETER.to_string(),
            parameter_description: None,
            return_full_result: false,
            source,
        }
    }

    pub fn with_parameter_name(mut self, name: impl Into<String>) -> Self {
        self.parameter_name = name.into();
        self
    }

    pub fn with_parameter_description(mut self, description: impl Into<String>) -> Self {
        self.parameter_description = Some(description.into());
        self
    }

    /// Return the whole agent result as JSON instead of its final text.
    pub fn with_full_result(mut self, full: bool) -> Self {
        self.return_full_result = full;
        self
    }

    async fn run(&self, prompt: String) -> Result<AgentResult> {
        match &self.source {
            AgentSource::Factory(factory) => {
                let mut agent = factory()?;
                agent.call(prompt).await
            }
            AgentSource::Shared(agent) => agent.lock().await.call(prompt).await,
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        let description = self
            .parameter_description
            .clone()
            .unwrap_or_else(|| format!("Input {} for the {}", self.parameter_name, self.name));
        let mut properties = serde_json::Map::new();
        properties.insert(
            self.parameter_name.clone(),
            json!({ "type": "string", "description": description }),
        );
        json!({
            "type": "object",
            "properties": properties,
            "required": [self.parameter_name],
        })
    }

    fn tool_type(&self) -> &str {
        "agent"
    }

    async fn invoke(
        &self,
        tool_use: &ToolUse,
        _ctx: &ToolContext<'_>,
    ) -> std::result::Result<ToolResult, ToolError> {
        let Some(prompt) = tool_use.input.get(&self.parameter_name).and_then(Value::as_str) else {
            return Ok(ToolResult::error(
                &tool_use.id,
                format!("Error: Missing required parameter: {}", self.parameter_name),
            ));
        };

        debug!(tool = %self.name, "Delegating to nested agent");
        let result = self
            .run(prompt.to_string())
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: e.to_string(),
            })?;

        if self.return_full_result {
            Ok(ToolResult {
                tool_use_id: tool_use.id.clone(),
                status: ToolResultStatus::Success,
                content: vec![ToolResultContent::Json(result.to_json())],
            })
        } else {
            Ok(ToolResult::success(&tool_use.id, result.text()))
        }
    }
}

/// Declarative form of a factory-backed [`AgentTool`].
#[derive(Clone)]
pub struct AgentToolConfig {
    pub name: String,
    pub description: String,
    pub factory: AgentFactory,
    pub parameter_name: Option<String>,
    pub parameter_description: Option<String>,
    pub return_full_result: bool,
}

impl AgentToolConfig {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Agent> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            factory: Arc::new(factory),
            parameter_name: None,
            parameter_description: None,
            return_full_result: false,
        }
    }
}

/// Build one tool per config, ready to hand to a coordinating agent.
pub fn agent_tools(configs: Vec<AgentToolConfig>) -> Vec<Arc<dyn Tool>> {
    configs
        .into_iter()
        .map(|config| {
            let mut tool = AgentTool::with_source(
                config.name,
                config.description,
                AgentSource::Factory(config.factory),
            )
            .with_full_result(config.return_full_result);
            if let Some(name) = config.parameter_name {
                tool = tool.with_parameter_name(name);
            }
            if let Some(description) = config.parameter_description {
                tool = tool.with_parameter_description(description);
            }
            Arc::new(tool) as Arc<dyn Tool>
        })
        .collect()
}
