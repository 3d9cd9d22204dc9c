//! Persona mode: the companion's current behavioral style.
//!
//! Only tool dispatch writes it (`set_persona_mode`); the UI reads it and the
//! transcript aggregator stamps it on companion turns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PersonaMode {
    /// Precise, encouraging, structured. Tutoring and factual questions.
    Academic,
    /// Warm and supportive. Stress, loneliness, casual talk.
    Empathetic,
    /// Standard polite and helpful interaction.
    #[default]
    Neutral,
    /// Playful and imaginative. Brainstorming and storytelling.
    Creative,
    /// Concise, formal, outcome focused. Work and planning.
    Professional,
}

impl PersonaMode {
    pub const ALL: [PersonaMode; 5] = [
        PersonaMode::Academic,
        PersonaMode::Empathetic,
        PersonaMode::Neutral,
        PersonaMode::Creative,
        PersonaMode::Professional,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaMode::Academic => "Academic",
            PersonaMode::Empathetic => "Empathetic",
            PersonaMode::Neutral => "Neutral",
            PersonaMode::Creative => "Creative",
            PersonaMode::Professional => "Professional",
        }
    }

    /// Names accepted on the wire, in declaration order.
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|m| m.as_str()).collect()
    }
}

impl fmt::Display for PersonaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a mode name outside the enumerated set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPersonaMode(pub String);

impl fmt::Display for UnknownPersonaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown persona mode '{}' (expected one of {})",
            self.0,
            PersonaMode::names().join(", ")
        )
    }
}

impl std::error::Error for UnknownPersonaMode {}

impl FromStr for PersonaMode {
    type Err = UnknownPersonaMode;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        PersonaMode::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownPersonaMode(s.to_string()))
    }
}
