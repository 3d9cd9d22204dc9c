//! RodioOutput: the production output device.
//!
//! A single timeline `Source` is appended to a `rodio::Sink` and never ends.
//! Scheduled segments are mixed into it at their start frame; the number of
//! frames the timeline has emitted is the device clock. When a segment's last
//! frame has been emitted its id is sent on the completion channel.

use crate::codec::PlaybackBuffer;
use crate::error::{LiveError, LiveResult};
use crate::playback::{OutputDevice, SegmentId};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Frames rendered per lock of the timeline (10ms at 24kHz).
const RENDER_FRAMES: usize = 240;

struct Entry {
    id: SegmentId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl Entry {
    fn end_frame(&self, channels: usize) -> u64 {
        self.start_frame + (self.samples.len() / channels) as u64
    }
}

struct Timeline {
    position: u64,
    sample_rate: u32,
    channels: u16,
    entries: Vec<Entry>,
    done_tx: mpsc::UnboundedSender<SegmentId>,
}

impl Timeline {
    /// Mix the next `frames` frames into `out` (interleaved) and advance the clock.
    fn render(&mut self, out: &mut Vec<f32>, frames: usize) {
        let channels = self.channels as usize;
        out.clear();
        out.resize(frames * channels, 0.0);

        let window_start = self.position;
        let window_end = window_start + frames as u64;
        for entry in &self.entries {
            let entry_end = entry.end_frame(channels);
            let from = entry.start_frame.max(window_start);
            let to = entry_end.min(window_end);
            if from >= to {
                continue;
            }
            let src_offset = ((from - entry.start_frame) as usize) * channels;
            let dst_offset = ((from - window_start) as usize) * channels;
            let len = ((to - from) as usize) * channels;
            for (dst, src) in out[dst_offset..dst_offset + len]
                .iter_mut()
                .zip(&entry.samples[src_offset..src_offset + len])
            {
                *dst += *src;
            }
        }
        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }

        self.position = window_end;
        let done_tx = &self.done_tx;
        self.entries.retain(|e| {
            if e.end_frame(channels) <= window_end {
                let _ = done_tx.send(e.id);
                false
            } else {
                true
            }
        });
    }
}

fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(|e| e.into_inner())
}

/// Endless source the sink pulls from.
struct TimelineSource {
    timeline: Arc<Mutex<Timeline>>,
    chunk: Vec<f32>,
    index: usize,
    sample_rate: u32,
    channels: u16,
}

impl Iterator for TimelineSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.index >= self.chunk.len() {
            lock(&self.timeline).render(&mut self.chunk, RENDER_FRAMES);
            self.index = 0;
        }
        let sample = self.chunk.get(self.index).copied();
        self.index += 1;
        sample
    }
}

impl Source for TimelineSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Output device playing through the default rodio output stream.
///
/// Not `Send` on every platform (the output stream is not); keep it on the
/// session's task.
pub struct RodioOutput {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Sink,
    timeline: Arc<Mutex<Timeline>>,
    sample_rate: u32,
    channels: u16,
}

impl RodioOutput {
    /// Open the default output device at the session's output format.
    pub fn new(
        sample_rate: u32,
        channels: u16,
        done_tx: mpsc::UnboundedSender<SegmentId>,
    ) -> LiveResult<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(LiveError::Configuration(format!(
                "invalid output format: {} Hz, {} channel(s)",
                sample_rate, channels
            )));
        }
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| LiveError::Playback(e.to_string()))?;
        let sink = Sink::try_new(&stream_handle).map_err(|e| LiveError::Playback(e.to_string()))?;

        let timeline = Arc::new(Mutex::new(Timeline {
            position: 0,
            sample_rate,
            channels,
            entries: Vec::new(),
            done_tx,
        }));
        sink.append(TimelineSource {
            timeline: Arc::clone(&timeline),
            chunk: Vec::new(),
            index: 0,
            sample_rate,
            channels,
        });
        info!(sample_rate, channels, "RodioOutput: timeline ready");

        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
            timeline,
            sample_rate,
            channels,
        })
    }
}

impl OutputDevice for RodioOutput {
    fn now(&self) -> f64 {
        let t = lock(&self.timeline);
        t.position as f64 / t.sample_rate as f64
    }

    fn schedule(&mut self, id: SegmentId, buffer: &PlaybackBuffer, start: f64) -> LiveResult<()> {
        if buffer.sample_rate != self.sample_rate || buffer.channels != self.channels {
            return Err(LiveError::Playback(format!(
                "buffer format {} Hz/{}ch does not match output {} Hz/{}ch",
                buffer.sample_rate, buffer.channels, self.sample_rate, self.channels
            )));
        }
        let mut t = lock(&self.timeline);
        let requested = (start.max(0.0) * self.sample_rate as f64).round() as u64;
        if requested < t.position {
            warn!(segment = %id, late_frames = t.position - requested, "segment scheduled in the past");
        }
        let start_frame = requested.max(t.position);
        t.entries.push(Entry {
            id,
            start_frame,
            samples: Arc::clone(&buffer.samples),
        });
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) {
        lock(&self.timeline).entries.retain(|e| e.id != id);
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        self.sink.stop();
    }
}
