//! Helpers shared by the integration suites.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tendril_agent::{Agent, AgentBuilder, FunctionTool, ToolOutput};
use tendril_core::event::{AgentEvent, EventHandler};
use tendril_core::tool::Tool;
use tendril_providers::ScriptedModel;

/// Records every event it sees.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<AgentEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events().iter().map(AgentEvent::event_type).collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.types().iter().filter(|t| **t == event_type).count()
    }
}

impl EventHandler for Recorder {
    fn handle(&self, event: &AgentEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn echo() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::sync("echo", "Echoes back the input", |input| {
        Ok(ToolOutput::Raw(input))
    }))
}

/// An agent over `model` that reports to `recorder`.
pub fn agent(model: &Arc<ScriptedModel>, recorder: &Arc<Recorder>) -> AgentBuilder {
    Agent::builder(model.clone()).handler(recorder.clone())
}
