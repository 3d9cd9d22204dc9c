//! # Kookie Live - Real-time Duplex Voice Sessions
//!
//! This crate runs a full-duplex spoken conversation with a remote
//! conversational model over the Gemini Live streaming channel: microphone
//! audio goes out as it is captured, synthesized speech comes back and is
//! played gaplessly, and the user can barge in at any time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Session Controller                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │   Audio In   │→ │   Capture    │→ │  Live Channel│  ──▶  │
//! │  │    (cpal)    │  │ (RMS, PCM16) │  │ (websocket)  │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │                                             ↓ inbound         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │  Audio Out   │← │   Playback   │← │ transcript / │       │
//! │  │   (rodio)    │  │  Scheduler   │  │ tools / audio│       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │                      ↑ flush on interruption                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything mutable lives in [`SessionController`] and is touched from one
//! task only. Devices and the network sit behind three seams
//! ([`InputDevice`], [`Connector`], [`OutputDevice`]) so the controller can be
//! driven end to end without hardware.

pub mod audio;
pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod memory;
pub mod persona;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod transport;
pub mod turn;
pub mod voice_output;

pub use audio::{AudioConfig, CaptureFrame, CaptureHandle, CpalInput, InputDevice};
pub use capture::{CapturePipeline, FrameOutcome};
pub use codec::PlaybackBuffer;
pub use config::LiveConfig;
pub use error::{ErrorKind, LiveError, LiveResult};
pub use memory::{MemoryEntry, MemoryStore};
pub use persona::PersonaMode;
pub use playback::{OutputDevice, PlaybackScheduler, Scheduled, SegmentId};
pub use session::{SessionController, SessionEvent, SessionNotice, SessionState, SessionStats};
pub use transport::{Connector, GeminiConnector, LiveChannel, RemoteEnd, TransportEvent};
pub use turn::{Role, Turn, TranscriptAggregator};
pub use voice_output::RodioOutput;
