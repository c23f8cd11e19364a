//! A model that replays scripted responses.
//!
//! Each call to `converse` pops the next [`ScriptStep`] and streams it back
//! over a channel, exactly like a network provider would. Every request is
//! recorded so callers can inspect what the event loop sent.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tendril_core::error::ModelError;
use tendril_core::message::{Role, ToolUse};
use tendril_core::model::{
    ContentDelta, EventStream, Model, ModelRequest, StopReason, StreamEvent, ToolUseStart, Usage,
};
use tracing::debug;

/// One scripted response.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Stream these events, then close.
    Events(Vec<StreamEvent>),
    /// Fail the call before any event is produced.
    Fail(ModelError),
    /// Stream some events, then fail mid-stream.
    Partial {
        events: Vec<StreamEvent>,
        error: ModelError,
    },
}

/// A [`Model`] backed by a queue of scripted responses.
///
/// Once the queue is empty every call fails with
/// [`ModelError::NotConfigured`].
pub struct ScriptedModel {
    model_id: String,
    steps: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::with_steps(Vec::new())
    }

    pub fn with_steps(steps: Vec<ScriptStep>) -> Self {
        Self {
            model_id: "scripted".into(),
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Queue a raw event sequence.
    pub fn then_events(self, events: Vec<StreamEvent>) -> Self {
        self.push(ScriptStep::Events(events));
        self
    }

    /// Queue a plain text answer that ends the turn.
    pub fn then_text(self, text: &str) -> Self {
        self.then_events(text_turn(text))
    }

    /// Queue a single tool-use request.
    pub fn then_tool_use(self, id: &str, name: &str, input: serde_json::Value) -> Self {
        self.then_events(tool_use_turn(&[ToolUse::new(id, name, input)]))
    }

    /// Queue several tool-use requests in one turn.
    pub fn then_tool_uses(self, tool_uses: &[ToolUse]) -> Self {
        self.then_events(tool_use_turn(tool_uses))
    }

    /// Queue a failure raised before streaming starts.
    pub fn then_error(self, error: ModelError) -> Self {
        self.push(ScriptStep::Fail(error));
        self
    }

    /// Queue a stream that fails after `events`.
    pub fn then_partial(self, events: Vec<StreamEvent>, error: ModelError) -> Self {
        self.push(ScriptStep::Partial { events, error });
        self
    }

    /// Add a step to the end of the queue.
    pub fn push(&self, step: ScriptStep) {
        self.steps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(step);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Steps not yet consumed.
    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn converse(&self, request: ModelRequest) -> Result<EventStream, ModelError> {
        let call = {
            let mut requests = self.requests.lock().unwrap_or_else(|p| p.into_inner());
            requests.push(request);
            requests.len()
        };

        let step = self
            .steps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .ok_or_else(|| {
                ModelError::NotConfigured(format!("no scripted response for call #{call}"))
            })?;

        debug!(model = %self.model_id, call, "Replaying scripted response");

        let (events, error) = match step {
            ScriptStep::Events(events) => (events, None),
            ScriptStep::Fail(error) => return Err(error),
            ScriptStep::Partial { events, error } => (events, Some(error)),
        };

        // Sized to hold the whole script so nothing ever blocks.
        let (tx, rx) = tokio::sync::mpsc::channel(events.len() + 1);
        for event in events {
            let _ = tx.try_send(Ok(event));
        }
        if let Some(error) = error {
            let _ = tx.try_send(Err(error));
        }
        Ok(rx)
    }
}

fn usage() -> StreamEvent {
    StreamEvent::Metadata {
        usage: Some(Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        }),
        metrics: None,
    }
}

/// Events for an assistant turn holding one text block.
pub fn text_turn(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::MessageStart {
            role: Role::Assistant,
        },
        StreamEvent::ContentBlockStart { tool_use: None },
        StreamEvent::ContentBlockDelta {
            delta: ContentDelta::Text(text.to_string()),
        },
        StreamEvent::ContentBlockStop,
        StreamEvent::MessageStop {
            stop_reason: StopReason::EndTurn,
        },
        usage(),
    ]
}

/// Events for an assistant turn requesting the given tools.
pub fn tool_use_turn(tool_uses: &[ToolUse]) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::MessageStart {
        role: Role::Assistant,
    }];
    for tool_use in tool_uses {
        events.push(StreamEvent::ContentBlockStart {
            tool_use: Some(ToolUseStart {
                tool_use_id: tool_use.id.clone(),
                name: tool_use.name.clone(),
            }),
        });
        events.push(StreamEvent::ContentBlockDelta {
            delta: ContentDelta::ToolUseInput(tool_use.input.to_string()),
        });
        events.push(StreamEvent::ContentBlockStop);
    }
    events.push(StreamEvent::MessageStop {
        stop_reason: StopReason::ToolUse,
    });
    events.push(usage());
    events
}
