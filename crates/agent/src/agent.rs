//! The agent façade.
//!
//! An [`Agent`] owns the conversation history, the tool registry, the
//! conversation manager and the lifetime metrics, and runs the event loop for
//! each prompt it receives.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use tendril_config::AgentSettings;
use tendril_core::error::{Error, Result, ToolError};
use tendril_core::event::{
    AgentEvent, ChannelHandler, CompositeHandler, EventHandler, LoggingHandler,
};
use tendril_core::message::{ContentBlock, Message, Role, ToolResult, ToolUse};
use tendril_core::model::Model;
use tendril_core::state::RequestState;
use tendril_core::tool::{Tool, ToolConfig, ToolContext, ToolRegistry};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversation::{self, ConversationManager, SlidingWindowConversationManager};
use crate::cycle::{CycleConfig, clean_orphaned_tool_uses, event_loop_cycle};
use crate::executor::{ToolExecutor, dispatch, fault_message};
use crate::metrics::CycleMetrics;
use crate::result::AgentResult;
use crate::retry::RetryPolicy;

const DEFAULT_MAX_CONTEXT_REDUCTIONS: u32 = 8;

pub struct Agent {
    model: Arc<dyn Model>,
    messages: Vec<Message>,
    system_prompt: Option<String>,
    handler: Arc<dyn EventHandler>,
    conversation_manager: Box<dyn ConversationManager>,
    tool_registry: ToolRegistry,
    executor: ToolExecutor,
    retry: RetryPolicy,
    metrics: CycleMetrics,
    record_direct_tool_call: bool,
    max_context_reductions: u32,
    name: Option<String>,
    description: Option<String>,
}

impl Agent {
    pub fn builder(model: Arc<dyn Model>) -> AgentBuilder {
        AgentBuilder::new(model)
    }

    /// Run the event loop for `prompt`.
    ///
    /// The conversation manager trims the history afterwards, whether or not
    /// the call succeeded.
    pub async fn call(&mut self, prompt: impl Into<String>) -> Result<AgentResult> {
        let handler = self.handler.clone();
        self.run(prompt.into(), handler.as_ref()).await
    }

    /// Run the event loop for `prompt`, yielding every lifecycle event as it
    /// happens and the final result last.
    pub fn stream_async(&mut self, prompt: impl Into<String>) -> AgentStream<'_> {
        let (channel, receiver) = ChannelHandler::channel();
        let handler = CompositeHandler::new(vec![self.handler.clone(), Arc::new(channel)]);
        let prompt = prompt.into();

        // The channel closes once this future, and the handler it owns, is dropped.
        let run = async move { self.run(prompt, &handler).await }.boxed();

        AgentStream {
            run: Some(run),
            events: UnboundedReceiverStream::new(receiver),
            outcome: None,
        }
    }

    /// Look up a tool for direct invocation outside the model loop.
    ///
    /// Only tools the model could call are found; a tool whose spec fails
    /// validation is registered but never advertised.
    pub fn tool(&mut self, name: &str) -> Result<ToolHandle<'_>> {
        if self.tool_registry.get(name).is_none() || !self.tool_config().contains(name) {
            return Err(ToolError::NotFound(name.to_string()).into());
        }
        Ok(ToolHandle {
            agent: self,
            name: name.to_string(),
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn metrics(&self) -> &CycleMetrics {
        &self.metrics
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tool_registry.names()
    }

    /// The capability descriptor sent to the model.
    pub fn tool_config(&self) -> ToolConfig {
        self.tool_registry.tool_config()
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tool_registry.register(tool);
    }

    async fn run(&mut self, prompt: String, handler: &dyn EventHandler) -> Result<AgentResult> {
        let result = self.run_loop(prompt, handler).await;
        self.conversation_manager
            .apply_management(&mut self.messages);
        result
    }

    async fn run_loop(&mut self, prompt: String, handler: &dyn EventHandler) -> Result<AgentResult> {
        handler.handle(&AgentEvent::InitEventLoop);
        // A turn cut short by the previous call must not precede the new prompt.
        clean_orphaned_tool_uses(&mut self.messages);
        self.messages.push(Message::user(prompt));

        let request_state = Arc::new(RequestState::new());
        let tool_config = self.tool_registry.tool_config();
        let mut reductions = 0;

        loop {
            let config = CycleConfig {
                model: self.model.as_ref(),
                system_prompt: self.system_prompt.as_deref(),
                tool_registry: Some(&self.tool_registry),
                tool_config: Some(&tool_config),
                handler,
                executor: &self.executor,
                retry: &self.retry,
            };

            match event_loop_cycle(&config, &mut self.messages, &mut self.metrics, &request_state)
                .await
            {
                Ok(result) => {
                    info!(
                        agent = self.name.as_deref().unwrap_or("agent"),
                        cycles = self.metrics.cycles,
                        stop_reason = ?result.stop_reason,
                        "Agent call complete"
                    );
                    return Ok(AgentResult::new(
                        result.stop_reason,
                        result.message,
                        self.metrics.clone(),
                        request_state,
                    ));
                }
                Err(e) if e.is_context_overflow() => {
                    if reductions >= self.max_context_reductions {
                        return Err(Error::ContextOverflow {
                            reductions,
                            reason: e.to_string(),
                        });
                    }
                    let removed = self.conversation_manager.reduce_context(&mut self.messages);
                    if removed == 0 {
                        return Err(Error::ContextOverflow {
                            reductions,
                            reason: e.to_string(),
                        });
                    }
                    reductions += 1;
                    warn!(
                        removed,
                        reductions,
                        remaining = self.messages.len(),
                        "Context window overflow, retrying with reduced history"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn record_tool_execution(&mut self, tool_use: &ToolUse, result: &ToolResult) {
        self.messages.extend([
            Message::user(format!(
                "agent.tool.{} direct tool call.\nInput parameters: {}\n",
                tool_use.name, tool_use.input
            )),
            Message::new(Role::Assistant, vec![ContentBlock::ToolUse(tool_use.clone())]),
            Message::new(Role::User, vec![ContentBlock::ToolResult(result.clone())]),
            Message::assistant(format!("agent.{} was called", tool_use.name)),
        ]);
    }
}

/// A tool resolved by [`Agent::tool`], ready to be called directly.
pub struct ToolHandle<'a> {
    agent: &'a mut Agent,
    name: String,
}

impl ToolHandle<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the tool with `input`.
    ///
    /// Unless disabled on the agent, the call is recorded in the history as
    /// if the model had made it.
    pub async fn call(self, input: serde_json::Value) -> Result<ToolResult> {
        let agent = self.agent;
        let simple = Uuid::new_v4().simple().to_string();
        let tool_use = ToolUse::new(
            format!("tooluse_{}_{}", self.name, &simple[..9]),
            self.name,
            input,
        );

        let tool_config = agent.tool_registry.tool_config();
        let request_state = RequestState::new();
        let result = {
            let ctx = ToolContext {
                messages: &agent.messages,
                model: agent.model.as_ref(),
                system_prompt: agent.system_prompt.as_deref(),
                tool_config: &tool_config,
                handler: agent.handler.as_ref(),
                request_state: &request_state,
            };
            match dispatch(&tool_use, &agent.tool_registry, &ctx).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %tool_use.name, error = %e, "Direct tool call failed");
                    ToolResult::error(&tool_use.id, fault_message(&e))
                }
            }
        };

        if agent.record_direct_tool_call {
            agent.record_tool_execution(&tool_use, &result);
        }
        agent
            .conversation_manager
            .apply_management(&mut agent.messages);

        Ok(result)
    }
}

/// One item of [`Agent::stream_async`].
#[derive(Debug, Clone)]
pub enum AgentStreamItem {
    Event(AgentEvent),
    Result(AgentResult),
}

/// Lifecycle events of a running call, followed by its result.
pub struct AgentStream<'a> {
    run: Option<BoxFuture<'a, Result<AgentResult>>>,
    events: UnboundedReceiverStream<AgentEvent>,
    outcome: Option<Result<AgentResult>>,
}

impl Stream for AgentStream<'_> {
    type Item = Result<AgentStreamItem>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if let Some(run) = this.run.as_mut() {
            if let Poll::Ready(outcome) = run.as_mut().poll(cx) {
                this.run = None;
                this.outcome = Some(outcome);
            }
        }

        match Pin::new(&mut this.events).poll_next(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(AgentStreamItem::Event(event)))),
            // Every event has been delivered; only the outcome is left.
            Poll::Ready(None) => {
                Poll::Ready(this.outcome.take().map(|r| r.map(AgentStreamItem::Result)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct AgentBuilder {
    model: Arc<dyn Model>,
    messages: Vec<Message>,
    tools: Vec<Arc<dyn Tool>>,
    system_prompt: Option<String>,
    handler: Arc<dyn EventHandler>,
    conversation_manager: Box<dyn ConversationManager>,
    max_parallel_tools: usize,
    retry: RetryPolicy,
    record_direct_tool_call: bool,
    max_context_reductions: u32,
    name: Option<String>,
    description: Option<String>,
}

impl AgentBuilder {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self {
            model,
            messages: Vec::new(),
            tools: Vec::new(),
            system_prompt: None,
            handler: Arc::new(LoggingHandler),
            conversation_manager: Box::new(SlidingWindowConversationManager::default()),
            max_parallel_tools: 1,
            retry: RetryPolicy::default(),
            record_direct_tool_call: true,
            max_context_reductions: DEFAULT_MAX_CONTEXT_REDUCTIONS,
            name: None,
            description: None,
        }
    }

    /// Apply loaded settings on top of the current builder state.
    pub fn settings(mut self, settings: &AgentSettings) -> Self {
        if let Some(prompt) = &settings.system_prompt {
            self.system_prompt = Some(prompt.clone());
        }
        self.max_parallel_tools = settings.max_parallel_tools;
        self.record_direct_tool_call = settings.record_direct_tool_call;
        self.max_context_reductions = settings.max_context_reductions;
        self.retry = RetryPolicy::from(&settings.retry);
        self.conversation_manager = conversation::from_config(&settings.conversation);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Seed the conversation history.
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn conversation_manager(mut self, manager: impl ConversationManager + 'static) -> Self {
        self.conversation_manager = Box::new(manager);
        self
    }

    /// How many tools may run at once; must be at least 1.
    pub fn max_parallel_tools(mut self, max: usize) -> Self {
        self.max_parallel_tools = max;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn record_direct_tool_call(mut self, record: bool) -> Self {
        self.record_direct_tool_call = record;
        self
    }

    /// Upper bound on context-overflow reliefs per call.
    pub fn max_context_reductions(mut self, max: u32) -> Self {
        self.max_context_reductions = max;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn build(self) -> Result<Agent> {
        let executor = ToolExecutor::new(self.max_parallel_tools)?;
        let mut tool_registry = ToolRegistry::new();
        tool_registry.process_tools(self.tools);

        Ok(Agent {
            model: self.model,
            messages: self.messages,
            system_prompt: self.system_prompt,
            handler: self.handler,
            conversation_manager: self.conversation_manager,
            tool_registry,
            executor,
            retry: self.retry,
            metrics: CycleMetrics::default(),
            record_direct_tool_call: self.record_direct_tool_call,
            max_context_reductions: self.max_context_reductions,
            name: self.name,
            description: self.description,
        })
    }
}
