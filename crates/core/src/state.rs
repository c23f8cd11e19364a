//! Per-call request state.
//!
//! A [`RequestState`] is created for every top-level agent call and shared by
//! reference with every tool executed during that call. Tools can stash
//! arbitrary values in it, or ask the event loop to stop after the current
//! batch of tool results instead of going back to the model.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value};

/// Caller-extensible bag threaded through one agent call.
#[derive(Debug, Default)]
pub struct RequestState {
    stop_event_loop: AtomicBool,
    values: Mutex<Map<String, Value>>,
}

impl RequestState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the event loop to stop once the current tool results are recorded.
    pub fn request_stop(&self) {
        self.stop_event_loop.store(true, Ordering::SeqCst);
    }

    /// Whether a tool asked the loop to stop.
    pub fn should_stop(&self) -> bool {
        self.stop_event_loop.load(Ordering::SeqCst)
    }

    /// Store a value under `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.lock().insert(key.into(), value)
    }

    /// Fetch a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// A JSON snapshot of the whole state.
    pub fn snapshot(&self) -> Value {
        let mut map = self.lock().clone();
        map.insert("stop_event_loop".into(), Value::Bool(self.should_stop()));
        Value::Object(map)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        // A poisoned lock only means a tool panicked mid-insert; the map itself is still usable.
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
