//! Model provider implementations for Tendril.
//!
//! All providers implement the `tendril_core::Model` trait. Real wire
//! protocols live behind that trait; this crate ships the deterministic
//! [`ScriptedModel`] used to drive the event loop offline and in tests.

pub mod scripted;

pub use scripted::{ScriptStep, ScriptedModel, text_turn, tool_use_turn};
