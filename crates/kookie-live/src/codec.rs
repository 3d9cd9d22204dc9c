//! Audio codec utilities: normalized `f32` frames <-> 16-bit little-endian PCM.
//!
//! The live channel carries PCM as base64 text inside JSON, so the helpers here
//! also wrap the base64 step. Everything is pure and safe to call from any thread.

use crate::error::{LiveError, LiveResult};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;

/// Bytes per encoded sample (signed 16-bit).
pub const BYTES_PER_SAMPLE: usize = 2;

/// A decoded buffer ready for the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Interleaved samples, normalized to -1.0..=1.0.
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }
}

/// Encode normalized samples as 16-bit little-endian PCM.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM into a playable buffer.
///
/// The payload must hold a whole number of frames for `channels`.
pub fn decode(payload: &[u8], sample_rate: u32, channels: u16) -> LiveResult<PlaybackBuffer> {
    if channels == 0 || sample_rate == 0 {
        return Err(LiveError::Decode(format!(
            "invalid sample format: {} Hz, {} channel(s)",
            sample_rate, channels
        )));
    }
    let frame_bytes = BYTES_PER_SAMPLE * channels as usize;
    if payload.len() % frame_bytes != 0 {
        return Err(LiveError::Decode(format!(
            "payload of {} bytes is not a multiple of the {}-byte frame",
            payload.len(),
            frame_bytes
        )));
    }
    let samples: Vec<f32> = payload
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();
    Ok(PlaybackBuffer::new(samples, sample_rate, channels))
}

/// Encode samples and wrap them in base64 for the wire.
pub fn encode_base64(samples: &[f32]) -> String {
    B64.encode(encode(samples))
}

/// Strip base64 and decode the PCM inside.
pub fn decode_base64(data: &str, sample_rate: u32, channels: u16) -> LiveResult<PlaybackBuffer> {
    let bytes = B64
        .decode(data.trim())
        .map_err(|e| LiveError::Decode(format!("invalid base64 audio: {}", e)))?;
    decode(&bytes, sample_rate, channels)
}

/// MIME type announced for outbound capture frames.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Root-mean-square loudness of a frame (0.0 for an empty frame).
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_two_bytes_per_sample() {
        let bytes = encode(&[0.0, 0.5, -0.5, 1.0, -1.0]);
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[0..2], &[0, 0]);
        // -1.0 maps to i16::MIN
        assert_eq!(i16::from_le_bytes([bytes[8], bytes[9]]), i16::MIN);
        // 1.0 saturates to i16::MAX
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), i16::MAX);
    }

    #[test]
    fn decode_keeps_sample_count() {
        let samples = vec![0.25f32; 2400];
        let buffer = decode(&encode(&samples), 24000, 1).unwrap();
        assert_eq!(buffer.samples.len(), 2400);
        assert!((buffer.duration_secs() - 0.1).abs() < 1e-9);
        assert!((buffer.samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn decode_rejects_odd_payload() {
        let err = decode(&[1, 2, 3], 24000, 1).unwrap_err();
        assert!(matches!(err, LiveError::Decode(_)));
    }

    #[test]
    fn decode_rejects_partial_stereo_frame() {
        // 3 samples cannot form whole stereo frames
        let err = decode(&[0u8; 6], 24000, 2).unwrap_err();
        assert!(matches!(err, LiveError::Decode(_)));
        let ok = decode(&[0u8; 8], 24000, 2).unwrap();
        assert_eq!(ok.frames(), 2);
    }

    #[test]
    fn decode_base64_rejects_garbage() {
        assert!(matches!(
            decode_base64("***not base64***", 24000, 1),
            Err(LiveError::Decode(_))
        ));
    }

    #[test]
    fn rms_of_constant_signal() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mime_type_names_rate() {
        assert_eq!(pcm_mime_type(16000), "audio/pcm;rate=16000");
    }
}
