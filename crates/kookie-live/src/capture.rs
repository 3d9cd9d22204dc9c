//! Capture pipeline: microphone frame -> level meter -> PCM16 -> outbound channel.
//!
//! Runs on the session task for every frame the input device delivers. It
//! holds at most the frame it is handed and never waits on the channel; a
//! full outbound queue drops the newest frame.

use crate::codec;
use crate::protocol::ClientMessage;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// What happened to one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Session is muted; frame discarded, level untouched.
    Muted,
    Forwarded,
    /// Outbound queue full; frame discarded.
    Dropped,
    /// The outbound side is gone.
    Closed,
}

#[derive(Debug)]
pub struct CapturePipeline {
    mime_type: String,
    muted: bool,
    level: f32,
    /// Drops since creation; throttles the warning only.
    dropped: u64,
}

impl CapturePipeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            mime_type: codec::pcm_mime_type(sample_rate),
            muted: false,
            level: 0.0,
            dropped: 0,
        }
    }

    pub fn process_frame(
        &mut self,
        frame: &[f32],
        outbound: &mpsc::Sender<ClientMessage>,
    ) -> FrameOutcome {
        if self.muted {
            return FrameOutcome::Muted;
        }

        self.level = codec::rms(frame);
        let message = ClientMessage::audio(self.mime_type.clone(), codec::encode_base64(frame));

        match outbound.try_send(message) {
            Ok(()) => FrameOutcome::Forwarded,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                // Log the first drop and then every 50th so a stalled link does not flood.
                if self.dropped % 50 == 1 {
                    warn!(dropped = self.dropped, "outbound audio queue full, dropping frame");
                } else {
                    debug!(dropped = self.dropped, "outbound audio frame dropped");
                }
                FrameOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => FrameOutcome::Closed,
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// RMS of the last forwarded frame.
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Clear transient state (mute flag and level) at session teardown.
    pub fn reset(&mut self) {
        self.muted = false;
        self.level = 0.0;
    }
}
