//! Gapless playback scheduling on top of an output device clock.
//!
//! Each enqueued buffer starts at `max(cursor, device.now())` and pushes the
//! cursor to its own end, so consecutive segments abut exactly. `flush` is the
//! barge-in path: every active segment is stopped and the cursor returns to 0.

use crate::codec::PlaybackBuffer;
use crate::error::LiveResult;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// Identifier of a scheduled segment, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg-{}", self.0)
    }
}

/// Output device seam: a clock plus scheduled start/stop of buffers.
///
/// Implementations report natural completion of a segment by sending its id on
/// the playback completion channel handed to them at construction. A stopped
/// segment must not be reported.
pub trait OutputDevice {
    /// Device clock in seconds.
    fn now(&self) -> f64;

    /// Start `buffer` at device time `start`.
    fn schedule(&mut self, id: SegmentId, buffer: &PlaybackBuffer, start: f64) -> LiveResult<()>;

    /// Stop a segment immediately, whether or not it has started.
    fn stop(&mut self, id: SegmentId);
}

/// A buffer owned by the scheduler while it is queued or playing.
#[derive(Debug, Clone)]
struct PlaybackSegment {
    buffer: PlaybackBuffer,
    scheduled_start: f64,
}

impl PlaybackSegment {
    fn end(&self) -> f64 {
        self.scheduled_start + self.buffer.duration_secs()
    }
}

/// Where a segment landed on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: SegmentId,
    pub start: f64,
    pub end: f64,
}

pub struct PlaybackScheduler<O: OutputDevice> {
    output: O,
    cursor: f64,
    active: BTreeMap<SegmentId, PlaybackSegment>,
    next_id: u64,
}

impl<O: OutputDevice> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            cursor: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Schedule `buffer` right after everything already queued.
    pub fn enqueue(&mut self, buffer: PlaybackBuffer) -> LiveResult<Scheduled> {
        let start = self.cursor.max(self.output.now());
        let id = SegmentId(self.next_id);
        self.output.schedule(id, &buffer, start)?;
        self.next_id += 1;

        let segment = PlaybackSegment {
            buffer,
            scheduled_start: start,
        };
        let end = segment.end();
        self.cursor = end;
        self.active.insert(id, segment);
        debug!(segment = %id, start, end, active = self.active.len(), "segment scheduled");
        Ok(Scheduled { id, start, end })
    }

    /// Stop every active segment and reset the cursor. Returns how many were stopped.
    pub fn flush(&mut self) -> usize {
        let stopped = self.active.len();
        for id in self.active.keys() {
            self.output.stop(*id);
        }
        self.active.clear();
        self.cursor = 0.0;
        if stopped > 0 {
            info!(stopped, "playback flushed");
        }
        stopped
    }

    /// Natural completion notice from the device. Unknown ids (already flushed) are ignored.
    pub fn segment_finished(&mut self, id: SegmentId) -> bool {
        let removed = self.active.remove(&id).is_some();
        if removed {
            debug!(segment = %id, active = self.active.len(), "segment finished");
        }
        removed
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}
