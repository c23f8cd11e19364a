//! Error types for the Tendril domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] is the union that
//! escapes a top-level agent call.

use std::sync::Arc;

use thiserror::Error;

use crate::state::RequestState;

/// The top-level error type for all Tendril operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model provider errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The context window kept overflowing and trimming history could not
    /// make further progress.
    #[error("Context window overflow could not be relieved after {reductions} reduction(s): {reason}")]
    ContextOverflow { reductions: u32, reason: String },

    /// A fault raised after a model turn was streamed successfully.
    /// Carries the request state of the call so callers can inspect it.
    #[error("Event loop failed: {source}")]
    EventLoop {
        #[source]
        source: Box<Error>,
        request_state: Arc<RequestState>,
    },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration fault.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Wrap this error with the request state of the call that produced it.
    ///
    /// An error that is already wrapped is returned unchanged.
    pub fn with_request_state(self, request_state: Arc<RequestState>) -> Self {
        match self {
            wrapped @ Self::EventLoop { .. } => wrapped,
            other => Self::EventLoop {
                source: Box::new(other),
                request_state,
            },
        }
    }

    /// The request state attached to this error, if any.
    pub fn request_state(&self) -> Option<&Arc<RequestState>> {
        match self {
            Self::EventLoop { request_state, .. } => Some(request_state),
            _ => None,
        }
    }

    /// Whether this error is a context-size overflow signalled by the model.
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, Self::Model(e) if e.is_context_overflow())
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures surfaced by a model provider.
///
/// The event loop depends on two distinguished signals: [`ModelError::Throttled`]
/// is retried with backoff and [`ModelError::ContextWindowOverflow`] triggers
/// history reduction. Everything else is opaque and propagates.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Throttled by model provider: {0}")]
    Throttled(String),

    #[error("Context window overflow: {0}")]
    ContextWindowOverflow(String),

    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Model not configured: {0}")]
    NotConfigured(String),
}

impl ModelError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }

    pub fn is_context_overflow(&self) -> bool {
        matches!(self, Self::ContextWindowOverflow(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_displays_correctly() {
        let err = Error::Model(ModelError::Api {
            status_code: 500,
            message: "upstream exploded".into(),
        });
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::ExecutionFailed {
            tool_name: "echo".into(),
            reason: "boom".into(),
        });
        assert!(err.to_string().contains("echo"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn context_overflow_is_detected_through_wrapper() {
        let err: Error = ModelError::ContextWindowOverflow("too long".into()).into();
        assert!(err.is_context_overflow());
        assert!(!Error::config("x").is_context_overflow());
    }

    #[test]
    fn request_state_wrapping_is_not_nested() {
        let state = Arc::new(RequestState::new());
        state.request_stop();
        let err = Error::Internal("oops".into()).with_request_state(state.clone());
        let err = err.with_request_state(Arc::new(RequestState::new()));

        let attached = err.request_state().unwrap();
        assert!(attached.should_stop());
        match err {
            Error::EventLoop { source, .. } => assert!(matches!(*source, Error::Internal(_))),
            other => panic!("Expected EventLoop, got {other:?}"),
        }
    }
}
