//! Streaming response assembly.
//!
//! [`StreamAssembler`] folds the provider's [`StreamEvent`]s into one
//! finished assistant turn, emitting the matching [`AgentEvent`]s as it goes.
//! Every event is handled exactly once and nothing is ever revisited, so the
//! same event sequence always yields the same turn.

use tendril_core::error::ModelError;
use tendril_core::event::{AgentEvent, EventHandler};
use tendril_core::message::{ContentBlock, Message, Role, ToolUse};
use tendril_core::model::{
    ContentDelta, Model, ModelRequest, StopReason, StreamEvent, StreamMetrics, Usage,
};
use tendril_core::tool::ToolSpec;
use tracing::{debug, warn};

/// The result of streaming one model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    pub stop_reason: StopReason,
    pub message: Message,
    pub usage: Usage,
    pub metrics: StreamMetrics,
}

/// A tool-use block still receiving input fragments.
#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    input: String,
}

/// One-pass fold over a model's event stream.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    content: Vec<ContentBlock>,
    text: String,
    tool_use: Option<PendingToolUse>,
    role: Option<Role>,
    stop_reason: StopReason,
    usage: Usage,
    metrics: StreamMetrics,
    redacted: Option<String>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event.
    ///
    /// `messages` is the history the request was built from; a user-content
    /// redaction rewrites its most recent user turn in place.
    pub fn handle(
        &mut self,
        event: StreamEvent,
        messages: &mut [Message],
        handler: &dyn EventHandler,
    ) {
        match event {
            StreamEvent::MessageStart { role } => {
                self.role = Some(role);
                handler.handle(&AgentEvent::MessageStart { role });
            }

            StreamEvent::ContentBlockStart { tool_use } => {
                self.flush_text();
                // A new block closes a tool use left open without a stop.
                if let Some(pending) = self.tool_use.take() {
                    self.finish_tool_use(pending, handler);
                }
                if let Some(start) = tool_use {
                    handler.handle(&AgentEvent::ToolUseStart {
                        tool_use_id: start.tool_use_id.clone(),
                        name: start.name.clone(),
                    });
                    self.tool_use = Some(PendingToolUse {
                        id: start.tool_use_id,
                        name: start.name,
                        input: String::new(),
                    });
                }
            }

            StreamEvent::ContentBlockDelta { delta } => match delta {
                ContentDelta::Text(text) => {
                    handler.handle(&AgentEvent::TextDelta { text: text.clone() });
                    self.text.push_str(&text);
                }
                ContentDelta::ToolUseInput(fragment) => match self.tool_use.as_mut() {
                    Some(pending) => {
                        handler.handle(&AgentEvent::ToolUseDelta {
                            input: fragment.clone(),
                        });
                        pending.input.push_str(&fragment);
                    }
                    None => debug!("Tool input fragment outside a tool-use block, ignoring"),
                },
            },

            StreamEvent::ContentBlockStop => {
                if let Some(pending) = self.tool_use.take() {
                    self.finish_tool_use(pending, handler);
                } else {
                    self.flush_text();
                }
            }

            StreamEvent::MessageStop { stop_reason } => {
                self.stop_reason = stop_reason;
                handler.handle(&AgentEvent::MessageStop { stop_reason });
            }

            StreamEvent::Metadata { usage, metrics } => {
                if let Some(usage) = usage {
                    self.usage = usage;
                }
                if let Some(metrics) = metrics {
                    self.metrics = metrics;
                }
            }

            StreamEvent::RedactContent {
                redact_user_content_message,
                redact_assistant_content_message,
            } => {
                if let Some(notice) = redact_user_content_message {
                    if let Some(turn) = messages.iter_mut().rev().find(|m| m.role == Role::User) {
                        turn.content = vec![ContentBlock::Text(notice)];
                    }
                }
                if let Some(notice) = redact_assistant_content_message {
                    self.content.clear();
                    self.text.clear();
                    self.tool_use = None;
                    self.redacted = Some(notice);
                }
            }
        }
    }

    /// Close whatever is still open and produce the finished turn.
    pub fn finish(mut self) -> StreamOutcome {
        self.flush_text();
        if let Some(pending) = self.tool_use.take() {
            // Unterminated block: keep it only if its fragments parse.
            let input = serde_json::from_str(&pending.input).unwrap_or(serde_json::Value::Null);
            self.content.push(ContentBlock::ToolUse(ToolUse::new(
                pending.id,
                pending.name,
                input,
            )));
        }

        let content = match self.redacted {
            Some(notice) => vec![ContentBlock::Text(notice)],
            None => self.content,
        };

        StreamOutcome {
            stop_reason: self.stop_reason,
            message: Message::new(self.role.unwrap_or(Role::Assistant), content),
            usage: self.usage,
            metrics: self.metrics,
        }
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.content
                .push(ContentBlock::Text(std::mem::take(&mut self.text)));
        }
    }

    fn finish_tool_use(&mut self, pending: PendingToolUse, handler: &dyn EventHandler) {
        let raw = if pending.input.trim().is_empty() {
            "{}"
        } else {
            pending.input.as_str()
        };

        match serde_json::from_str(raw) {
            Ok(input) => {
                let tool_use = ToolUse::new(pending.id, pending.name, input);
                handler.handle(&AgentEvent::ToolUseComplete {
                    tool_use: tool_use.clone(),
                });
                self.content.push(ContentBlock::ToolUse(tool_use));
            }
            Err(e) => {
                warn!(tool = %pending.name, error = %e, "Failed to parse tool input");
                self.content.push(ContentBlock::Text(format!(
                    "Error parsing tool input: {e}"
                )));
            }
        }
    }
}

/// Stream one model turn for the given conversation.
pub async fn stream_messages(
    model: &dyn Model,
    system_prompt: Option<&str>,
    messages: &mut [Message],
    tool_specs: &[ToolSpec],
    handler: &dyn EventHandler,
) -> Result<StreamOutcome, ModelError> {
    let request = ModelRequest {
        messages: messages.to_vec(),
        system_prompt: system_prompt.map(str::to_string),
        tool_specs: tool_specs.to_vec(),
    };

    let mut stream = model.converse(request).await?;
    let mut assembler = StreamAssembler::new();
    while let Some(event) = stream.recv().await {
        assembler.handle(event?, messages, handler);
    }
    Ok(assembler.finish())
}
