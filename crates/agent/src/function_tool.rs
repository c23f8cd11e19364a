//! Closure-backed tools.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tendril_core::error::ToolError;
use tendril_core::message::{ToolResult, ToolResultContent, ToolResultStatus, ToolUse};
use tendril_core::tool::{Tool, ToolContext};

/// What a function tool's closure hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// A plain value, wrapped into a single-text success result.
    /// Strings are used verbatim; anything else is rendered as pretty JSON.
    Raw(Value),
    /// A result the closure has already shaped.
    Shaped {
        status: ToolResultStatus,
        content: Vec<ToolResultContent>,
    },
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Raw(Value::String(text))
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::Raw(Value::String(text.to_string()))
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::Raw(value)
    }
}

type Handler = dyn Fn(Value) -> BoxFuture<'static, Result<ToolOutput, ToolError>> + Send + Sync;

/// A tool whose behaviour is a closure over the tool-use input.
pub struct FunctionTool {
    name: String,
    description: String,
    input_schema: Value,
    handler: Arc<Handler>,
}

impl FunctionTool {
    /// Wrap an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            handler: Arc::new(move |input| handler(input).boxed()),
        }
    }

    /// Wrap a synchronous closure.
    pub fn sync<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
    {
        Self::new(name, description, move |input| futures::future::ready(handler(input)))
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn invoke(
        &self,
        tool_use: &ToolUse,
        _ctx: &ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let params = match &tool_use.input {
            Value::Null => Value::Object(Default::default()),
            input => input.clone(),
        };

        let result = match (self.handler)(params).await {
            Ok(ToolOutput::Raw(Value::String(text))) => ToolResult::success(&tool_use.id, text),
            Ok(ToolOutput::Raw(value)) => ToolResult::success(
                &tool_use.id,
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            ),
            Ok(ToolOutput::Shaped { status, content }) => ToolResult {
                tool_use_id: tool_use.id.clone(),
                status,
                content,
            },
            Err(e) => ToolResult::error(&tool_use.id, format!("Error: {e}")),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tendril_core::event::NullHandler;
    use tendril_core::state::RequestState;
    use tendril_core::tool::ToolConfig;
    use tendril_providers::ScriptedModel;

    async fn invoke(tool: &FunctionTool, input: Value) -> ToolResult {
        let model = ScriptedModel::new();
        let config = ToolConfig::default();
        let state = RequestState::new();
        let ctx = ToolContext {
            messages: &[],
            model: &model,
            system_prompt: None,
            tool_config: &config,
            handler: &NullHandler,
            request_state: &state,
        };
        tool.invoke(&ToolUse::new("t1", tool.name(), input), &ctx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn raw_values_are_wrapped() {
        let greet = FunctionTool::sync("greet", "Says hello", |input| {
            Ok(format!("Hello, {}!", input["name"].as_str().unwrap_or("stranger")).into())
        });
        let result = invoke(&greet, json!({"name": "Ada"})).await;
        assert_eq!(result.text(), "Hello, Ada!");
        assert_eq!(result.tool_use_id, "t1");

        let sum = FunctionTool::new("sum", "Adds numbers", |input: Value| async move {
            let total: i64 = input["values"]
                .as_array()
                .map(|v| v.iter().filter_map(Value::as_i64).sum())
                .unwrap_or(0);
            Ok::<_, ToolError>(ToolOutput::from(json!({ "total": total })))
        });
        let result = invoke(&sum, json!({"values": [1, 2, 3]})).await;
        let parsed: Value = serde_json::from_str(&result.text()).unwrap();
        assert_eq!(parsed, json!({"total": 6}));
    }

    #[tokio::test]
    async fn shaped_results_pass_through() {
        let lookup = FunctionTool::sync("lookup", "Finds records", |_| {
            Ok(ToolOutput::Shaped {
                status: ToolResultStatus::Error,
                content: vec![ToolResultContent::Json(json!({"code": 404}))],
            })
        });
        let result = invoke(&lookup, Value::Null).await;
        assert!(result.is_error());
        assert_eq!(result.content, vec![ToolResultContent::Json(json!({"code": 404}))]);
    }

    #[tokio::test]
    async fn closure_errors_become_error_results() {
        let strict = FunctionTool::sync("strict", "Rejects everything", |_| {
            Err(ToolError::InvalidArguments("no".into()))
        });
        let result = invoke(&strict, json!({})).await;
        assert!(result.is_error());
        assert_eq!(result.text(), "Error: Invalid tool arguments: no");
    }

    #[test]
    fn schema_defaults_and_overrides() {
        let tool = FunctionTool::sync("t", "d", |_| Ok("".into()));
        assert_eq!(tool.input_schema()["type"], "object");

        let tool = tool.with_input_schema(json!({"type": "object", "required": ["q"]}));
        assert_eq!(tool.spec().input_schema["required"][0], "q");
    }
}
