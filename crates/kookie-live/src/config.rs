//! Session configuration: model identity, voice, audio formats and channel bounds.
//!
//! Loaded from (lowest to highest precedence) built-in defaults, an optional TOML
//! file, then `KOOKIE__*` environment variables. The API key additionally falls
//! back to `GEMINI_API_KEY` and `API_KEY`.
//!
//! | Env | Default |
//! |-----|---------|
//! | KOOKIE_CONFIG | config/kookie (file path, extension optional) |
//! | KOOKIE__ENDPOINT | Gemini Live BidiGenerateContent websocket |
//! | KOOKIE__MODEL | gemini-2.5-flash-native-audio-preview-12-2025 |
//! | KOOKIE__VOICE | Kore |
//! | KOOKIE__INPUT_SAMPLE_RATE | 16000 |
//! | KOOKIE__OUTPUT_SAMPLE_RATE | 24000 |
//! | KOOKIE__OUTPUT_CHANNELS | 1 |
//! | KOOKIE__FRAME_SIZE | 4096 |
//! | KOOKIE__OUTBOUND_AUDIO_CAPACITY | 32 |
//! | KOOKIE__CAPTURE_QUEUE_CAPACITY | 32 |

use crate::error::{LiveError, LiveResult};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_VOICE: &str = "Kore";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = r#"You are "KOOKIE", a multimodal AI companion.
Your primary trait is adaptive empathy. Pay attention to the user's tone, pacing, and emotional state.

MODES:
1. Academic: the user sounds focused, asks factual questions, or needs tutoring. Be precise, encouraging, and structured.
2. Empathetic: the user sounds stressed, lonely, or casual. Be warm and supportive.
3. Creative: the user is brainstorming, storytelling, or looking for inspiration. Be playful and imaginative.
4. Professional: the user is working, planning tasks, or needs efficiency. Be concise, formal, and focused on outcomes.
5. Neutral: standard polite and helpful interaction.

FEATURES:
- You are interruptible. If the user starts speaking, stop immediately.
- Remember important facts: if the user mentions a goal (e.g. "I have an exam on Friday"), save it.
- Switch personas as the conversation shifts.

When you switch modes or save a memory, call the provided tools.
Keep your spoken responses natural, concise, and conversational."#;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Capture rate announced to the remote side (Hz).
    pub input_sample_rate: u32,
    /// Rate of inbound audio payloads (Hz).
    pub output_sample_rate: u32,
    pub output_channels: u16,
    /// Samples per capture frame.
    pub frame_size: usize,
    /// Capture frames the outbound channel holds before dropping new ones.
    pub outbound_audio_capacity: usize,
    /// Device frames waiting for the session task before new ones are dropped.
    pub capture_queue_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            output_channels: 1,
            frame_size: 4096,
            outbound_audio_capacity: 32,
            capture_queue_capacity: 32,
        }
    }
}

impl fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("input_sample_rate", &self.input_sample_rate)
            .field("output_sample_rate", &self.output_sample_rate)
            .field("output_channels", &self.output_channels)
            .field("frame_size", &self.frame_size)
            .field("outbound_audio_capacity", &self.outbound_audio_capacity)
            .field("capture_queue_capacity", &self.capture_queue_capacity)
            .finish()
    }
}

impl LiveConfig {
    /// Load config from file and environment. Precedence: env `KOOKIE__*` > file at
    /// `KOOKIE_CONFIG` (default `config/kookie`) > defaults.
    pub fn load() -> LiveResult<Self> {
        let config_path =
            std::env::var("KOOKIE_CONFIG").unwrap_or_else(|_| "config/kookie".to_string());
        Self::load_from(Path::new(&config_path))
    }

    pub fn load_from(path: &Path) -> LiveResult<Self> {
        let builder = config::Config::builder();
        let builder = if path.exists() || path.with_extension("toml").exists() {
            builder.add_source(config::File::from(path).required(false))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("KOOKIE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LiveError::Configuration(e.to_string()))?;

        let mut cfg: LiveConfig = built
            .try_deserialize()
            .map_err(|e| LiveError::Configuration(e.to_string()))?;

        if cfg.api_key.trim().is_empty() {
            cfg.api_key = std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("API_KEY"))
                .unwrap_or_default();
        }
        Ok(cfg)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    /// Reject settings the session cannot be opened with.
    pub fn validate(&self) -> LiveResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(LiveError::Configuration(
                "API key missing (set KOOKIE__API_KEY or GEMINI_API_KEY)".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(LiveError::Configuration("model identity is empty".to_string()));
        }
        if !self.endpoint.starts_with("ws://") && !self.endpoint.starts_with("wss://") {
            return Err(LiveError::Configuration(format!(
                "endpoint must be a ws:// or wss:// URL, got '{}'",
                self.endpoint
            )));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(LiveError::Configuration("sample rates must be non-zero".to_string()));
        }
        if self.output_channels == 0 {
            return Err(LiveError::Configuration("output channel count must be non-zero".to_string()));
        }
        if self.frame_size == 0
            || self.outbound_audio_capacity == 0
            || self.capture_queue_capacity == 0
        {
            return Err(LiveError::Configuration(
                "frame size and queue capacities must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `models/<id>` form expected by the setup message.
    pub fn model_resource(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    /// Websocket URL with the API key attached.
    pub fn connect_url(&self) -> String {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, sep, self.api_key)
    }
}
