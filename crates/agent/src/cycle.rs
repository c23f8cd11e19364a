//! The event-loop cycle controller.
//!
//! One cycle streams a model turn and, when the model asks for tools, runs
//! them and feeds the results back. Cycles repeat until the model stops
//! asking for tools or a tool sets the stop flag on the request state.
//! Repetition is an explicit loop, so stack depth does not grow with the
//! length of the conversation.

use std::sync::Arc;

use tendril_core::error::{Error, Result};
use tendril_core::event::{AgentEvent, EventHandler};
use tendril_core::message::{ContentBlock, Message, Role, ToolUse};
use tendril_core::model::{Model, StopReason};
use tendril_core::state::RequestState;
use tendril_core::tool::{ToolConfig, ToolContext, ToolRegistry};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::executor::ToolExecutor;
use crate::metrics::CycleMetrics;
use crate::retry::{RetryPolicy, stream_with_retry};

/// Collaborators shared by every cycle of one call.
pub struct CycleConfig<'a> {
    pub model: &'a dyn Model,
    pub system_prompt: Option<&'a str>,
    /// Required once the model asks for a tool
    pub tool_registry: Option<&'a ToolRegistry>,
    /// Capability descriptor advertised to the model
    pub tool_config: Option<&'a ToolConfig>,
    pub handler: &'a dyn EventHandler,
    pub executor: &'a ToolExecutor,
    pub retry: &'a RetryPolicy,
}

/// The final turn of a sequence of cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleResult {
    pub stop_reason: StopReason,
    pub message: Message,
}

/// Run cycles until the model produces a final answer.
///
/// Errors raised while streaming the first turn are returned as-is. Context
/// overflow is always returned as-is so the caller can shrink the history
/// and start over. Every other failure emits [`AgentEvent::ForceStop`] and
/// comes back wrapped with `request_state`.
pub async fn event_loop_cycle(
    config: &CycleConfig<'_>,
    messages: &mut Vec<Message>,
    metrics: &mut CycleMetrics,
    request_state: &Arc<RequestState>,
) -> Result<CycleResult> {
    let tool_specs = config
        .tool_config
        .map(|c| c.tools.clone())
        .unwrap_or_default();
    let mut recursed = false;

    loop {
        let cycle_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        metrics.cycles += 1;

        info!(
            cycle = metrics.cycles,
            cycle_id = %cycle_id,
            messages = messages.len(),
            "Starting event loop cycle"
        );
        config.handler.handle(&AgentEvent::CycleStart { cycle_id });

        clean_orphaned_tool_uses(messages);

        let outcome = match stream_with_retry(
            config.model,
            config.system_prompt,
            messages,
            &tool_specs,
            config.handler,
            config.retry,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) if !recursed || e.is_context_overflow() => return Err(e.into()),
            Err(e) => return Err(force_stop(config.handler, e.into(), request_state)),
        };

        messages.push(outcome.message.clone());
        config.handler.handle(&AgentEvent::Message {
            message: outcome.message.clone(),
        });
        metrics.add_usage(&outcome.usage);
        if let Some(latency_ms) = outcome.metrics.latency_ms {
            metrics.add_latency(latency_ms);
        }

        if outcome.stop_reason != StopReason::ToolUse {
            metrics.add_cycle_time(started.elapsed());
            return Ok(CycleResult {
                stop_reason: outcome.stop_reason,
                message: outcome.message,
            });
        }

        let (registry, tool_config) = match (config.tool_registry, config.tool_config) {
            (Some(registry), Some(tool_config)) => (registry, tool_config),
            (None, _) => {
                let e = Error::config("Model requested tool use but no tool registry provided");
                return Err(force_stop(config.handler, e, request_state));
            }
            (_, None) => {
                let e = Error::config("Model requested tool use but no tool config provided");
                return Err(force_stop(config.handler, e, request_state));
            }
        };

        let tool_uses: Vec<ToolUse> = outcome.message.tool_uses().into_iter().cloned().collect();
        if tool_uses.is_empty() {
            debug!("Tool use requested without any tool-use blocks, ending cycle");
            metrics.add_cycle_time(started.elapsed());
            return Ok(CycleResult {
                stop_reason: outcome.stop_reason,
                message: outcome.message,
            });
        }

        let ctx = ToolContext {
            messages: messages.as_slice(),
            model: config.model,
            system_prompt: config.system_prompt,
            tool_config,
            handler: config.handler,
            request_state: request_state.as_ref(),
        };
        let results = match config
            .executor
            .run_tools(&tool_uses, registry, &ctx, metrics)
            .await
        {
            Ok(results) => results,
            Err(e) => return Err(force_stop(config.handler, e, request_state)),
        };

        let results_turn = Message::tool_results(results);
        messages.push(results_turn.clone());
        config.handler.handle(&AgentEvent::Message {
            message: results_turn,
        });
        metrics.add_cycle_time(started.elapsed());

        if request_state.should_stop() {
            info!(cycle = metrics.cycles, "Tool requested stop, ending event loop");
            return Ok(CycleResult {
                stop_reason: outcome.stop_reason,
                message: outcome.message,
            });
        }

        recursed = true;
    }
}

fn force_stop(handler: &dyn EventHandler, error: Error, request_state: &Arc<RequestState>) -> Error {
    warn!(error = %error, "Event loop stopped by error");
    handler.handle(&AgentEvent::ForceStop {
        reason: error.to_string(),
    });
    error.with_request_state(request_state.clone())
}

/// Drop unresolved tool uses from a trailing assistant turn.
///
/// A truncated stream can leave a tool use whose input never arrived. The
/// turn is removed entirely if nothing else remains in it.
pub fn clean_orphaned_tool_uses(messages: &mut Vec<Message>) {
    let Some(last) = messages.last_mut() else {
        return;
    };
    if last.role != Role::Assistant {
        return;
    }

    let before = last.content.len();
    last.content
        .retain(|block| !matches!(block, ContentBlock::ToolUse(t) if t.input.is_null()));
    if last.content.len() != before {
        debug!(removed = before - last.content.len(), "Removed orphaned tool uses");
    }
    if last.content.is_empty() {
        messages.pop();
    }
}
