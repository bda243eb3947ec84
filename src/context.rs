//! Builds the bounded message list sent to the generation backend.
//!
//! Each call gets the session's system messages plus the last N
//! non-system messages, followed by an ephemeral system suffix carrying
//! the collected-fields snapshot (and the interruption snapshot when a
//! barge-in just happened). The suffix is injected per call and never
//! committed to history.

use std::fmt::Write as _;

use crate::session::{ChatMessage, ConversationState, FieldName};

/// Context assembly for generation calls
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    /// Non-system messages retained in the rolling window
    window: usize,
}

impl ContextBuilder {
    #[must_use]
    pub const fn new(window: usize) -> Self {
        Self { window }
    }

    /// Assemble the full message list for one turn: bounded history,
    /// ephemeral state suffix, then the uncommitted user utterance
    #[must_use]
    pub fn build(&self, state: &ConversationState, user_text: &str) -> Vec<ChatMessage> {
        let mut messages = state.bounded_history(self.window);
        messages.push(ChatMessage::system(Self::state_suffix(state)));
        messages.push(ChatMessage::user(user_text));
        messages
    }

    /// Render the collected-fields snapshot and, when set, the
    /// interruption snapshot
    fn state_suffix(state: &ConversationState) -> String {
        let mut suffix = String::from(
            "[COLLECTED FIELDS - USE ONLY THESE VALUES FOR THE SUMMARY]\n",
        );
        for field in FieldName::ALL {
            let value = state
                .collected_fields
                .get(field)
                .unwrap_or("(not specified)");
            let _ = writeln!(suffix, "{field}: {value}");
        }
        suffix.push_str(
            "A \"(not specified)\" field was NOT collected; never invent a value for it.\n",
        );

        let interruption = &state.interruption_state;
        if interruption.was_interrupted {
            suffix.push_str("\n[INTERRUPTION STATE]\n");
            let _ = writeln!(
                suffix,
                "You were interrupted while: {}",
                interruption
                    .interrupted_context
                    .as_deref()
                    .unwrap_or("discussing a topic")
            );
            if let Some(field) = &interruption.interrupted_field {
                let _ = writeln!(suffix, "Interrupted field: {field}");
            }
            suffix.push_str("Acknowledge the interruption and resume naturally.\n");
        }

        suffix
    }
}
