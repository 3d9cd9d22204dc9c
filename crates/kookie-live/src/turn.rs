//! Turn aggregation for the conversation transcript
//!
//! Streamed transcription arrives as arbitrary substrings for both directions.
//! The aggregator concatenates them and, on a turn-complete signal, emits the
//! finished user turn followed by the finished companion turn.

use crate::persona::PersonaMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Who spoke a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Companion,
}

/// One finalized utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Persona at completion time; set on companion turns only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PersonaMode>,
}

/// Accumulates partial transcription for the current turn
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    pending_in: String,
    pending_out: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment of the user's speech
    pub fn append_input(&mut self, text: &str) {
        self.pending_in.push_str(text);
    }

    /// Append a fragment of the companion's speech
    pub fn append_output(&mut self, text: &str) {
        self.pending_out.push_str(text);
    }

    pub fn pending_input(&self) -> &str {
        &self.pending_in
    }

    pub fn pending_output(&self) -> &str {
        &self.pending_out
    }

    /// Close the current turn.
    ///
    /// Returns zero, one or two turns (user first). Both accumulators are
    /// cleared whether or not anything was emitted.
    pub fn complete_turn(&mut self, mode: PersonaMode) -> Vec<Turn> {
        let user_text = std::mem::take(&mut self.pending_in);
        let companion_text = std::mem::take(&mut self.pending_out);
        let timestamp = Utc::now();

        let mut turns = Vec::with_capacity(2);
        if !user_text.is_empty() {
            turns.push(Turn {
                role: Role::User,
                text: user_text,
                timestamp,
                mode: None,
            });
        }
        if !companion_text.is_empty() {
            turns.push(Turn {
                role: Role::Companion,
                text: companion_text,
                timestamp,
                mode: Some(mode),
            });
        }
        debug!(emitted = turns.len(), "turn boundary");
        turns
    }

    /// Drop any partial text without emitting turns (session teardown).
    pub fn reset(&mut self) {
        self.pending_in.clear();
        self.pending_out.clear();
    }
}

/// Append-only log of finalized turns, in creation order
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }
}
