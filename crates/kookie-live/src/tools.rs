//! Tool dispatch for remote function calls.
//!
//! The remote model asks for side effects (`save_memory`, `set_persona_mode`) in
//! batches. Each call is dispatched on its own and always produces exactly one
//! [`FunctionResponse`] carrying the originating id, including when the call
//! fails validation: an unanswered call stalls the remote turn.

use crate::error::{LiveError, LiveResult};
use crate::memory::{MemoryEntry, MemoryStore};
use crate::persona::PersonaMode;
use crate::protocol::{FunctionCall, FunctionResponse};
use serde_json::{json, Value};
use tracing::{info, warn};

pub const SAVE_MEMORY: &str = "save_memory";
pub const SET_PERSONA_MODE: &str = "set_persona_mode";

/// Function declarations sent in the setup message.
pub fn declarations() -> Vec<Value> {
    vec![
        json!({
            "name": SAVE_MEMORY,
            "description": "Save important context or facts about the user for future reference.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "key": { "type": "STRING", "description": "Short unique identifier (e.g. \"exam_date\")" },
                    "value": { "type": "STRING", "description": "The detail to remember." }
                },
                "required": ["key", "value"]
            }
        }),
        json!({
            "name": SET_PERSONA_MODE,
            "description": "Update the companion personality mode based on user tone or explicit request.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "mode": {
                        "type": "STRING",
                        "enum": PersonaMode::names(),
                        "description": "The new personality mode to adopt."
                    }
                },
                "required": ["mode"]
            }
        }),
    ]
}

/// State change caused by a successful call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEffect {
    MemorySaved(MemoryEntry),
    PersonaChanged { from: PersonaMode, to: PersonaMode },
}

/// Result of dispatching one call: the response to send back, plus what changed.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub response: FunctionResponse,
    pub effect: Option<ToolEffect>,
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        self.response.response.get("error").is_some()
    }
}

/// Mutable conversation state the tools may touch.
pub struct ToolContext<'a> {
    pub memories: &'a mut MemoryStore,
    pub persona: &'a mut PersonaMode,
}

/// Dispatch every call of a batch, in order.
pub fn dispatch_batch(calls: &[FunctionCall], ctx: &mut ToolContext<'_>) -> Vec<ToolOutcome> {
    calls.iter().map(|call| dispatch(call, ctx)).collect()
}

/// Dispatch one call. Never fails: errors become error responses.
pub fn dispatch(call: &FunctionCall, ctx: &mut ToolContext<'_>) -> ToolOutcome {
    let result = match call.name.as_str() {
        SAVE_MEMORY => save_memory(&call.args, ctx),
        SET_PERSONA_MODE => set_persona_mode(&call.args, ctx),
        other => Err(LiveError::InvalidToolArgument(format!("unknown tool '{}'", other))),
    };

    match result {
        Ok((message, effect)) => ToolOutcome {
            response: FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response: json!({ "result": message }),
            },
            effect: Some(effect),
        },
        Err(e) => {
            warn!(call_id = %call.id, tool = %call.name, error = %e, "tool call rejected");
            ToolOutcome {
                response: FunctionResponse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    response: json!({ "error": e.to_string() }),
                },
                effect: None,
            }
        }
    }
}

fn string_arg(args: &Value, name: &str) -> LiveResult<String> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(LiveError::InvalidToolArgument(format!(
            "argument '{}' must be a string, got {}",
            name, other
        ))),
        None => Err(LiveError::InvalidToolArgument(format!("missing argument '{}'", name))),
    }
}

fn save_memory(args: &Value, ctx: &mut ToolContext<'_>) -> LiveResult<(String, ToolEffect)> {
    let key = string_arg(args, "key")?;
    let value = string_arg(args, "value")?;
    if key.trim().is_empty() {
        return Err(LiveError::InvalidToolArgument("memory key is empty".to_string()));
    }
    let entry = MemoryEntry { key, value };
    info!(key = %entry.key, total = ctx.memories.len() + 1, "memory saved");
    ctx.memories.push(entry.clone());
    Ok(("Memory saved.".to_string(), ToolEffect::MemorySaved(entry)))
}

fn set_persona_mode(args: &Value, ctx: &mut ToolContext<'_>) -> LiveResult<(String, ToolEffect)> {
    let raw = string_arg(args, "mode")?;
    let to: PersonaMode = raw
        .parse()
        .map_err(|e: crate::persona::UnknownPersonaMode| LiveError::InvalidToolArgument(e.to_string()))?;
    let from = *ctx.persona;
    *ctx.persona = to;
    info!(from = %from, to = %to, "persona mode switched");
    Ok((format!("Mode switched to {}.", to), ToolEffect::PersonaChanged { from, to }))
}
