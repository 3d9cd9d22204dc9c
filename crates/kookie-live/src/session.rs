//! Session controller: the state machine and its event loop
//!
//! One controller owns every piece of session state (capture device handle,
//! channel, playback scheduler, transcript, memories, persona) and mutates it
//! only from [`SessionController::handle_event`]. Events come from three
//! sources, each FIFO on its own channel:
//!
//! - `CaptureTick`: a frame from the input device callback
//! - `Inbound`: a transport event from the socket reader
//! - `PlaybackFinished`: natural completion of a scheduled segment
//!
//! ```text
//!   Idle ──start()──▶ Connecting ──Opened──▶ Open ──stop()──▶ Closing ──▶ Idle
//!    ▲                   │                    │
//!    └──setup rejected───┤                    │
//!                        └──transport error───┴──▶ Errored (restartable)
//! ```

use crate::audio::{CaptureFrame, CaptureHandle, InputDevice};
use crate::capture::{CapturePipeline, FrameOutcome};
use crate::codec;
use crate::config::LiveConfig;
use crate::error::{ErrorKind, LiveError, LiveResult};
use crate::memory::{MemoryEntry, MemoryStore};
use crate::persona::PersonaMode;
use crate::playback::{OutputDevice, PlaybackScheduler, SegmentId};
use crate::protocol::{ClientMessage, ServerContent, ServerMessage, ToolResponse};
use crate::tools::{self, ToolContext, ToolEffect};
use crate::transport::{self, Connector, LiveChannel, TransportEvent};
use crate::turn::{ConversationLog, TranscriptAggregator, Turn};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Errored,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// One unit of work for the event loop.
#[derive(Debug)]
pub enum SessionEvent {
    CaptureTick(CaptureFrame),
    Inbound(TransportEvent),
    PlaybackFinished(SegmentId),
}

/// Observable changes, delivered to every subscriber in order.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    StateChanged { from: SessionState, to: SessionState },
    Turn(Turn),
    MemorySaved(MemoryEntry),
    PersonaChanged { from: PersonaMode, to: PersonaMode },
    Interrupted { stopped: usize },
    GoAway { time_left: Option<String> },
    Error { kind: ErrorKind, message: String, detail: String },
}

/// Counters since the controller was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_forwarded: u64,
    /// Muted frames plus frames the full outbound queue rejected.
    pub frames_dropped: u64,
    pub segments_enqueued: u64,
    pub decode_failures: u64,
    pub tool_calls_answered: u64,
}

pub struct SessionController<I, C, O>
where
    I: InputDevice,
    C: Connector,
    O: OutputDevice,
{
    config: LiveConfig,
    input: I,
    connector: C,
    state: SessionState,

    capture_handle: Option<CaptureHandle>,
    frames_rx: Option<mpsc::Receiver<CaptureFrame>>,
    channel: Option<LiveChannel>,
    playback_rx: mpsc::UnboundedReceiver<SegmentId>,

    capture: CapturePipeline,
    playback: PlaybackScheduler<O>,
    transcript: TranscriptAggregator,
    log: ConversationLog,
    memories: MemoryStore,
    persona: PersonaMode,

    subscribers: Vec<mpsc::UnboundedSender<SessionNotice>>,
    stats: SessionStats,
}

impl<I, C, O> SessionController<I, C, O>
where
    I: InputDevice,
    C: Connector,
    O: OutputDevice,
{
    /// `playback_rx` receives the completion ids the output device sends.
    pub fn new(
        config: LiveConfig,
        input: I,
        connector: C,
        output: O,
        playback_rx: mpsc::UnboundedReceiver<SegmentId>,
    ) -> Self {
        let capture = CapturePipeline::new(config.input_sample_rate);
        Self {
            config,
            input,
            connector,
            state: SessionState::Idle,
            capture_handle: None,
            frames_rx: None,
            channel: None,
            playback_rx,
            capture,
            playback: PlaybackScheduler::new(output),
            transcript: TranscriptAggregator::new(),
            log: ConversationLog::new(),
            memories: MemoryStore::new(),
            persona: PersonaMode::default(),
            subscribers: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Acquire the microphone and open the channel.
    ///
    /// On return the session is `Connecting`; the `Opened` event moves it to
    /// `Open`. Setup failures (including the server refusing the setup
    /// later) leave it `Idle`, transport failures `Errored`. Either way
    /// nothing stays acquired.
    pub async fn start(&mut self) -> LiveResult<()> {
        match self.state {
            SessionState::Idle | SessionState::Errored => {}
            other => {
                warn!(state = %other, "start ignored, session already running");
                return Ok(());
            }
        }

        info!("🚀 Starting live session");
        self.set_state(SessionState::Connecting);

        // Held in locals until both succeed so an early return releases them.
        let acquired = self.acquire().await;
        match acquired {
            Ok((handle, frames_rx, channel)) => {
                self.capture_handle = Some(handle);
                self.frames_rx = Some(frames_rx);
                self.channel = Some(channel);
                Ok(())
            }
            Err(e) => {
                let next = if e.is_setup_error() {
                    SessionState::Idle
                } else {
                    SessionState::Errored
                };
                error!(error = %e, "session start failed");
                self.publish_error(&e);
                self.set_state(next);
                Err(e)
            }
        }
    }

    async fn acquire(
        &mut self,
    ) -> LiveResult<(CaptureHandle, mpsc::Receiver<CaptureFrame>, LiveChannel)> {
        self.config.validate()?;

        let (frames_tx, frames_rx) = mpsc::channel(self.config.capture_queue_capacity);
        let handle = self.input.acquire(frames_tx)?;

        let setup = transport::session_setup(&self.config);
        let channel = self.connector.connect(setup).await?;
        Ok((handle, frames_rx, channel))
    }

    /// Close the channel, flush playback and release the microphone.
    ///
    /// Safe from any state; a no-op when already `Idle`.
    pub fn stop(&mut self) {
        match self.state {
            SessionState::Idle => {
                debug!("stop ignored, session idle");
                return;
            }
            SessionState::Errored => {
                self.set_state(SessionState::Idle);
                return;
            }
            _ => {}
        }

        info!("🛑 Stopping live session");
        self.set_state(SessionState::Closing);
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.playback.flush();
        self.release_capture();
        self.capture.reset();
        self.transcript.reset();
        self.set_state(SessionState::Idle);
    }

    /// Mute only gates the capture pipeline; inbound handling is unaffected.
    pub fn set_muted(&mut self, muted: bool) {
        if self.capture.is_muted() != muted {
            info!(muted, "microphone mute toggled");
        }
        self.capture.set_muted(muted);
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Wait for the next event from any source. `None` once every source is closed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let frames = self.frames_rx.as_mut();
        let channel = self.channel.as_mut();
        tokio::select! {
            Some(frame) = recv_or_pending(frames) => Some(SessionEvent::CaptureTick(frame)),
            event = inbound_or_pending(channel) => Some(SessionEvent::Inbound(event)),
            Some(id) = self.playback_rx.recv() => Some(SessionEvent::PlaybackFinished(id)),
            else => None,
        }
    }

    /// Take one event and run it to completion. Returns false when no source is left.
    pub async fn pump(&mut self) -> bool {
        match self.next_event().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// Handle every event that is ready right now without waiting.
    ///
    /// Takes one event per source in turn until all three are empty. Uses
    /// `try_recv`, so the runtime's cooperative budget never cuts it short.
    pub fn drain_ready(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let before = handled;

            let frame = self.frames_rx.as_mut().and_then(|rx| rx.try_recv().ok());
            if let Some(frame) = frame {
                self.handle_event(SessionEvent::CaptureTick(frame));
                handled += 1;
            }

            let inbound = self.channel.as_mut().and_then(LiveChannel::try_recv);
            if let Some(event) = inbound {
                self.handle_event(SessionEvent::Inbound(event));
                handled += 1;
            }

            if let Ok(id) = self.playback_rx.try_recv() {
                self.handle_event(SessionEvent::PlaybackFinished(id));
                handled += 1;
            }

            if handled == before {
                return handled;
            }
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::CaptureTick(frame) => self.on_capture(&frame),
            SessionEvent::Inbound(event) => self.on_transport(event),
            SessionEvent::PlaybackFinished(id) => {
                self.playback.segment_finished(id);
            }
        }
    }

    fn on_capture(&mut self, frame: &[f32]) {
        if self.state != SessionState::Open {
            debug!(state = %self.state, "capture frame before open, dropped");
            return;
        }
        let Some(channel) = self.channel.as_ref() else {
            return;
        };
        let outcome = self.capture.process_frame(frame, channel.audio());
        match outcome {
            FrameOutcome::Forwarded => self.stats.frames_forwarded += 1,
            FrameOutcome::Muted | FrameOutcome::Dropped => self.stats.frames_dropped += 1,
            FrameOutcome::Closed => {
                self.fail(LiveError::Transport("outbound channel closed".to_string()))
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        if !matches!(self.state, SessionState::Connecting | SessionState::Open) {
            debug!(state = %self.state, "transport event after teardown, ignored");
            return;
        }
        match event {
            TransportEvent::Opened => {
                if self.state == SessionState::Connecting {
                    info!("✅ Live session open");
                    self.set_state(SessionState::Open);
                }
            }
            TransportEvent::Message(message) => {
                if self.state == SessionState::Open {
                    self.on_message(message);
                } else if let Some(batch) = message.tool_call {
                    // Every call needs its response, even one that races setupComplete.
                    self.on_tool_calls(&batch.function_calls);
                } else {
                    debug!("server content before setup completed, ignored");
                }
            }
            TransportEvent::GoAway { time_left } => {
                warn!(time_left = ?time_left, "server will close the session soon");
                self.publish(SessionNotice::GoAway { time_left });
            }
            TransportEvent::Closed { reason } => {
                let detail = reason.unwrap_or_else(|| "no close frame".to_string());
                // A close before setupComplete is the server refusing the setup (model, key, voice).
                let err = if self.state == SessionState::Connecting {
                    LiveError::Configuration(format!("server rejected the session setup: {}", detail))
                } else {
                    LiveError::Transport(format!("channel closed unexpectedly: {}", detail))
                };
                self.fail(err);
            }
            TransportEvent::Error(e) => self.fail(e),
        }
    }

    /// Fixed order: transcription, turn completion, interruption, tools, audio.
    fn on_message(&mut self, message: ServerMessage) {
        let ServerMessage {
            server_content,
            tool_call,
            tool_call_cancellation,
            ..
        } = message;

        if let Some(content) = &server_content {
            self.on_transcription(content);
            if content.turn_complete {
                self.complete_turn();
            }
            if content.interrupted {
                let stopped = self.playback.flush();
                info!(stopped, "⚡ Barge-in, playback flushed");
                self.publish(SessionNotice::Interrupted { stopped });
            }
        }

        if let Some(batch) = tool_call {
            self.on_tool_calls(&batch.function_calls);
            if self.state != SessionState::Open {
                return;
            }
        }

        if let Some(cancellation) = tool_call_cancellation {
            // Calls are answered synchronously, so there is never anything left to cancel.
            info!(ids = ?cancellation.ids, "server cancelled tool calls");
        }

        if let Some(content) = &server_content {
            self.on_audio(content);
        }
    }

    fn on_transcription(&mut self, content: &ServerContent) {
        if let Some(t) = &content.input_transcription {
            self.transcript.append_input(&t.text);
        }
        if let Some(t) = &content.output_transcription {
            self.transcript.append_output(&t.text);
        }
    }

    fn complete_turn(&mut self) {
        let turns = self.transcript.complete_turn(self.persona);
        for turn in &turns {
            info!(role = ?turn.role, text = %turn.text, "💬 Turn");
            self.publish(SessionNotice::Turn(turn.clone()));
        }
        self.log.extend(turns);
    }

    fn on_tool_calls(&mut self, calls: &[crate::protocol::FunctionCall]) {
        if calls.is_empty() {
            return;
        }
        let outcomes = {
            let mut ctx = ToolContext {
                memories: &mut self.memories,
                persona: &mut self.persona,
            };
            tools::dispatch_batch(calls, &mut ctx)
        };

        let mut responses = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome.effect {
                Some(ToolEffect::MemorySaved(entry)) => self.publish(SessionNotice::MemorySaved(entry)),
                Some(ToolEffect::PersonaChanged { from, to }) => {
                    self.publish(SessionNotice::PersonaChanged { from, to })
                }
                None => {}
            }
            responses.push(outcome.response);
        }

        let answered = responses.len() as u64;
        let sent = match self.channel.as_ref() {
            Some(channel) => channel.send_control(ClientMessage::ToolResponse(ToolResponse {
                function_responses: responses,
            })),
            None => Err(LiveError::Transport("no channel for tool responses".to_string())),
        };
        match sent {
            Ok(()) => {
                self.stats.tool_calls_answered += answered;
                debug!(answered, "tool responses queued");
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_audio(&mut self, content: &ServerContent) {
        let channels = self.config.output_channels;
        let rate = self.config.output_sample_rate;
        for blob in content.audio_blobs() {
            // The output device runs at the negotiated rate only.
            if let Some(declared) = blob.sample_rate().filter(|r| *r != rate) {
                self.stats.decode_failures += 1;
                warn!(declared, expected = rate, "skipping audio payload at unexpected rate");
                continue;
            }
            let buffer = match codec::decode_base64(&blob.data, rate, channels) {
                Ok(buffer) => buffer,
                Err(e) => {
                    self.stats.decode_failures += 1;
                    warn!(error = %e, "skipping undecodable audio payload");
                    continue;
                }
            };
            match self.playback.enqueue(buffer) {
                Ok(_) => self.stats.segments_enqueued += 1,
                Err(e) => warn!(error = %e, "could not schedule audio segment"),
            }
        }
    }

    /// Tear down first, report, then transition. Setup rejections land in
    /// `Idle`, everything else in `Errored`.
    fn fail(&mut self, err: LiveError) {
        error!(error = %err, state = %self.state, "❌ Live session failed");
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.playback.flush();
        self.release_capture();
        self.capture.reset();
        self.transcript.reset();
        self.publish_error(&err);
        let next = if err.is_setup_error() {
            SessionState::Idle
        } else {
            SessionState::Errored
        };
        self.set_state(next);
    }

    fn release_capture(&mut self) {
        if self.capture_handle.take().is_some() {
            debug!("microphone released");
        }
        self.frames_rx = None;
    }

    // ------------------------------------------------------------------
    // Notices
    // ------------------------------------------------------------------

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, notice: SessionNotice) {
        self.subscribers.retain(|tx| tx.send(notice.clone()).is_ok());
    }

    fn publish_error(&mut self, err: &LiveError) {
        self.publish(SessionNotice::Error {
            kind: err.kind(),
            message: err.user_message(),
            detail: err.to_string(),
        });
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(%from, %to, "session state");
        self.publish(SessionNotice::StateChanged { from, to });
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn is_muted(&self) -> bool {
        self.capture.is_muted()
    }

    pub fn level(&self) -> f32 {
        self.capture.level()
    }

    pub fn turns(&self) -> &[Turn] {
        self.log.turns()
    }

    pub fn memories(&self) -> &[MemoryEntry] {
        self.memories.entries()
    }

    pub fn persona(&self) -> PersonaMode {
        self.persona
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn playback(&self) -> &PlaybackScheduler<O> {
        &self.playback
    }

    pub fn pending_transcript(&self) -> (&str, &str) {
        (self.transcript.pending_input(), self.transcript.pending_output())
    }
}

async fn recv_or_pending<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// A channel whose reader vanished without a word counts as closed.
async fn inbound_or_pending(channel: Option<&mut LiveChannel>) -> TransportEvent {
    match channel {
        Some(channel) => channel
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed { reason: None }),
        None => std::future::pending().await,
    }
}
