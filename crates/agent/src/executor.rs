//! Tool execution engine.
//!
//! Runs the tool uses of one assistant turn and returns exactly one
//! [`ToolResult`] per request, in request order. Tool failures never escape:
//! an unknown name, a malformed request or a faulting tool each turn into an
//! error result for that request alone.

use futures::StreamExt;
use tendril_core::error::{Error, Result, ToolError};
use tendril_core::event::AgentEvent;
use tendril_core::message::{ToolResult, ToolUse};
use tendril_core::tool::{ToolContext, ToolRegistry};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::metrics::CycleMetrics;

const INVALID_TOOL_USE: &str = "Invalid tool use: missing required fields";

/// Resolve and invoke a single tool use.
///
/// The tool must be advertised in the context's capability descriptor and
/// present in `registry`; otherwise an error result is returned. `Err` means
/// the tool itself faulted.
pub async fn dispatch(
    tool_use: &ToolUse,
    registry: &ToolRegistry,
    ctx: &ToolContext<'_>,
) -> std::result::Result<ToolResult, ToolError> {
    if !ctx.tool_config.contains(&tool_use.name) {
        return Ok(ToolResult::error(
            &tool_use.id,
            format!("Tool '{}' not found", tool_use.name),
        ));
    }

    let Some(tool) = registry.get(&tool_use.name) else {
        return Ok(ToolResult::error(
            &tool_use.id,
            format!("Tool '{}' not found in registry", tool_use.name),
        ));
    };

    tool.invoke(tool_use, ctx).await
}

/// Text of the error result substituted for a faulting tool.
pub(crate) fn fault_message(error: &ToolError) -> String {
    let reason = match error {
        ToolError::ExecutionFailed { reason, .. } => reason.clone(),
        other => other.to_string(),
    };
    format!("Tool execution failed: {reason}")
}

struct Execution {
    result: ToolResult,
    /// Set for requests that were actually dispatched
    elapsed: Option<Duration>,
}

/// Executes batches of tool uses with a concurrency cap.
#[derive(Debug, Clone, Copy)]
pub struct ToolExecutor {
    max_parallel: usize,
}

impl ToolExecutor {
    /// An executor running at most `max_parallel` tools at once.
    pub fn new(max_parallel: usize) -> Result<Self> {
        if max_parallel == 0 {
            return Err(Error::config("max_parallel_tools must be greater than 0"));
        }
        Ok(Self { max_parallel })
    }

    pub fn sequential() -> Self {
        Self { max_parallel: 1 }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Execute `tool_uses`, returning their results in the same order.
    ///
    /// Fails only if a tool answers with a result for a different tool use.
    pub async fn run_tools(
        &self,
        tool_uses: &[ToolUse],
        registry: &ToolRegistry,
        ctx: &ToolContext<'_>,
        metrics: &mut CycleMetrics,
    ) -> Result<Vec<ToolResult>> {
        let executions: Vec<Execution> = if self.max_parallel > 1 && tool_uses.len() > 1 {
            // Built up front so the stream holds plain futures, not a closure over borrows.
            let pending: Vec<_> = tool_uses
                .iter()
                .map(|tool_use| execute(tool_use, registry, ctx))
                .collect();
            futures::stream::iter(pending)
                .buffered(self.max_parallel)
                .collect()
                .await
        } else {
            let mut executions = Vec::with_capacity(tool_uses.len());
            for tool_use in tool_uses {
                executions.push(execute(tool_use, registry, ctx).await);
            }
            executions
        };

        let mut results = Vec::with_capacity(executions.len());
        for (tool_use, execution) in tool_uses.iter().zip(executions) {
            if execution.result.tool_use_id != tool_use.id {
                return Err(ToolError::ExecutionFailed {
                    tool_name: tool_use.name.clone(),
                    reason: format!(
                        "returned a result for tool use '{}' while handling '{}'",
                        execution.result.tool_use_id, tool_use.id
                    ),
                }
                .into());
            }
            if let Some(elapsed) = execution.elapsed {
                metrics.record_tool(&tool_use.name, !execution.result.is_error(), elapsed);
            }
            results.push(execution.result);
        }
        Ok(results)
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::sequential()
    }
}

async fn execute(tool_use: &ToolUse, registry: &ToolRegistry, ctx: &ToolContext<'_>) -> Execution {
    if !tool_use.is_valid() {
        warn!(tool_use_id = %tool_use.id, tool = %tool_use.name, "Skipping invalid tool use");
        return Execution {
            result: ToolResult::error(&tool_use.id, INVALID_TOOL_USE),
            elapsed: None,
        };
    }

    ctx.handler.handle(&AgentEvent::ToolExecutionStart {
        tool_use: tool_use.clone(),
    });
    let start = Instant::now();

    let result = match dispatch(tool_use, registry, ctx).await {
        Ok(result) => {
            ctx.handler.handle(&AgentEvent::ToolExecutionComplete {
                tool_use: tool_use.clone(),
                result: result.clone(),
            });
            result
        }
        Err(e) => {
            warn!(tool = %tool_use.name, error = %e, "Tool execution failed");
            ctx.handler.handle(&AgentEvent::ToolExecutionError {
                tool_use: tool_use.clone(),
                error: e.to_string(),
            });
            ToolResult::error(&tool_use.id, fault_message(&e))
        }
    };

    let elapsed = start.elapsed();
    info!(
        tool = %tool_use.name,
        tool_use_id = %tool_use.id,
        status = ?result.status,
        duration_ms = elapsed.as_millis() as u64,
        "Tool executed"
    );

    Execution {
        result,
        elapsed: Some(elapsed),
    }
}
