//! Conversation window management.
//!
//! A [`ConversationManager`] keeps the history inside the model's context:
//! a routine trim after every call, and an emergency reduction whenever the
//! model reports a context-window overflow.

use tendril_config::{ConversationConfig, ConversationStrategy};
use tendril_core::message::Message;
use tracing::{debug, info};

pub trait ConversationManager: Send + Sync {
    /// Trim the history after a call, successful or not.
    fn apply_management(&self, messages: &mut Vec<Message>);

    /// Shrink the history after a context overflow.
    ///
    /// Returns how many turns were removed; zero means no progress is possible.
    fn reduce_context(&self, messages: &mut Vec<Message>) -> usize;
}

/// Build the manager selected by `config`.
pub fn from_config(config: &ConversationConfig) -> Box<dyn ConversationManager> {
    match config.strategy {
        ConversationStrategy::SlidingWindow => Box::new(
            SlidingWindowConversationManager::new(config.window_size)
                .with_preserve_protected(config.preserve_protected),
        ),
        ConversationStrategy::None => Box::new(NullConversationManager),
    }
}

/// Keeps only the most recent turns.
#[derive(Debug, Clone)]
pub struct SlidingWindowConversationManager {
    window_size: usize,
    preserve_protected: bool,
}

impl SlidingWindowConversationManager {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            preserve_protected: true,
        }
    }

    /// Whether turns with guard content or cache points survive trimming.
    pub fn with_preserve_protected(mut self, preserve: bool) -> Self {
        self.preserve_protected = preserve;
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

impl Default for SlidingWindowConversationManager {
    fn default() -> Self {
        Self::new(20)
    }
}

impl ConversationManager for SlidingWindowConversationManager {
    fn apply_management(&self, messages: &mut Vec<Message>) {
        if messages.len() <= self.window_size {
            return;
        }

        let is_kept = |m: &Message| self.preserve_protected && m.is_protected();
        let protected = messages.iter().filter(|m| is_kept(*m)).count();
        let ordinary = messages.len() - protected;
        let mut to_drop = ordinary.saturating_sub(self.window_size.saturating_sub(protected));

        let before = messages.len();
        messages.retain(|m| {
            if is_kept(m) || to_drop == 0 {
                return true;
            }
            to_drop -= 1;
            false
        });

        debug!(
            removed = before - messages.len(),
            remaining = messages.len(),
            protected,
            "Trimmed conversation window"
        );
    }

    fn reduce_context(&self, messages: &mut Vec<Message>) -> usize {
        let remove = messages.len() / 4;
        if remove == 0 {
            return 0;
        }

        // Turn 0 usually establishes the conversation; keep it verbatim.
        messages.drain(1..=remove);
        info!(
            removed = remove,
            remaining = messages.len(),
            "Reduced context after overflow"
        );
        remove
    }
}

/// Leaves the history untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConversationManager;

impl ConversationManager for NullConversationManager {
    fn apply_management(&self, _messages: &mut Vec<Message>) {}

    fn reduce_context(&self, _messages: &mut Vec<Message>) -> usize {
        0
    }
}
