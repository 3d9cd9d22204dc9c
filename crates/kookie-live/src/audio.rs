//! Microphone capture using CPAL
//!
//! The device callback slices the input into fixed-size frames and hands each
//! one to the session's capture queue. It never blocks: the queue is bounded
//! and a frame that does not fit is dropped.

use crate::error::{LiveError, LiveResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::any::Any;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

/// One fixed-size block of normalized mono samples.
pub type CaptureFrame = Vec<f32>;

/// Keeps an acquired input device open. Dropping it releases the device.
pub struct CaptureHandle {
    _guard: Box<dyn Any>,
}

impl CaptureHandle {
    pub fn new(guard: impl Any) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

/// Input device seam used by the session controller.
pub trait InputDevice {
    /// Open the device and start delivering frames on `frames`.
    fn acquire(&mut self, frames: mpsc::Sender<CaptureFrame>) -> LiveResult<CaptureHandle>;
}

/// Capture settings
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Samples per frame delivered to the session (default: 4096)
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 4096,
        }
    }
}

/// Default system microphone through CPAL
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    config: AudioConfig,
}

impl CpalInput {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    /// List available input devices
    pub fn list_input_devices() -> LiveResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }
}

impl InputDevice for CpalInput {
    fn acquire(&mut self, frames: mpsc::Sender<CaptureFrame>) -> LiveResult<CaptureHandle> {
        info!(
            "🎤 Acquiring microphone ({}Hz mono, {}-sample frames)",
            self.config.sample_rate, self.config.frame_size
        );

        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| LiveError::DeviceNotFound("No input device available".to_string()))?;

        info!("📱 Using input device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

        // Surfaces permission and availability problems before the stream is built.
        let default_config = device.default_input_config()?;
        info!("🔧 Default config: {:?}", default_config);

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let frame_size = self.config.frame_size;
        let mut pending = Vec::with_capacity(frame_size);
        let mut dropped: u64 = 0;

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push(sample);
                    if pending.len() >= frame_size {
                        let frame = std::mem::replace(&mut pending, Vec::with_capacity(frame_size));
                        match frames.try_send(frame) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                dropped += 1;
                                if dropped % 50 == 1 {
                                    warn!(dropped, "capture queue full, dropping frame");
                                }
                            }
                            // Receiver gone means the session is tearing down.
                            Err(TrySendError::Closed(_)) => {}
                        }
                    }
                }
            },
            move |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        info!("✅ Audio capture started");

        Ok(CaptureHandle::new(stream))
    }
}
