//! End-to-end session tests with scripted devices and a scripted channel.
//!
//! No hardware or network: the input device, connector and output device are
//! test doubles, and inbound traffic is pushed through the channel's far end.

use async_trait::async_trait;
use kookie_live::codec;
use kookie_live::protocol::{ClientMessage, ServerMessage, Setup};
use kookie_live::{
    CaptureFrame, CaptureHandle, Connector, ErrorKind, InputDevice, LiveChannel, LiveConfig,
    LiveError, LiveResult, OutputDevice, PersonaMode, PlaybackBuffer, RemoteEnd, Role,
    SegmentId, SessionController, SessionNotice, SessionState, TransportEvent,
};
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

struct Released(Rc<Cell<usize>>);

impl Drop for Released {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

#[derive(Clone, Default)]
struct FakeInput {
    acquired: Rc<Cell<usize>>,
    released: Rc<Cell<usize>>,
    fail_with: Rc<RefCell<Option<LiveError>>>,
    frames: Rc<RefCell<Option<mpsc::Sender<CaptureFrame>>>>,
}

impl FakeInput {
    fn push_frame(&self, frame: Vec<f32>) {
        if let Some(tx) = self.frames.borrow().as_ref() {
            tx.try_send(frame).expect("capture queue has room");
        }
    }
}

impl InputDevice for FakeInput {
    fn acquire(&mut self, frames: mpsc::Sender<CaptureFrame>) -> LiveResult<CaptureHandle> {
        if let Some(err) = self.fail_with.borrow_mut().take() {
            return Err(err);
        }
        self.acquired.set(self.acquired.get() + 1);
        *self.frames.borrow_mut() = Some(frames);
        Ok(CaptureHandle::new(Released(Rc::clone(&self.released))))
    }
}

#[derive(Clone)]
struct FakeConnector {
    capacity: usize,
    remotes: Rc<RefCell<Vec<RemoteEnd>>>,
    setups: Rc<RefCell<Vec<Setup>>>,
    refuse: Rc<Cell<bool>>,
    fail_with: Rc<RefCell<Option<LiveError>>>,
}

impl FakeConnector {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            remotes: Rc::default(),
            setups: Rc::default(),
            refuse: Rc::default(),
            fail_with: Rc::default(),
        }
    }
}

#[async_trait(?Send)]
impl Connector for FakeConnector {
    async fn connect(&self, setup: Setup) -> LiveResult<LiveChannel> {
        if self.refuse.get() {
            return Err(LiveError::Transport("connection refused".to_string()));
        }
        if let Some(err) = self.fail_with.borrow_mut().take() {
            return Err(err);
        }
        self.setups.borrow_mut().push(setup);
        let (channel, remote) = LiveChannel::pair(self.capacity);
        self.remotes.borrow_mut().push(remote);
        Ok(channel)
    }
}

#[derive(Clone, Default)]
struct FakeOutput {
    now: Rc<Cell<f64>>,
    scheduled: Rc<RefCell<Vec<(SegmentId, f64)>>>,
    stopped: Rc<RefCell<Vec<SegmentId>>>,
}

impl OutputDevice for FakeOutput {
    fn now(&self) -> f64 {
        self.now.get()
    }

    fn schedule(&mut self, id: SegmentId, _buffer: &PlaybackBuffer, start: f64) -> LiveResult<()> {
        self.scheduled.borrow_mut().push((id, start));
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) {
        self.stopped.borrow_mut().push(id);
    }
}

struct Harness {
    session: SessionController<FakeInput, FakeConnector, FakeOutput>,
    input: FakeInput,
    connector: FakeConnector,
    output: FakeOutput,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    playback_tx: mpsc::UnboundedSender<SegmentId>,
}

impl Harness {
    fn new() -> Self {
        Self::with_capacity(8)
    }

    fn with_capacity(capacity: usize) -> Self {
        Self::with_config(capacity, |_| {})
    }

    fn with_config(capacity: usize, tweak: impl FnOnce(&mut LiveConfig)) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let input = FakeInput::default();
        let connector = FakeConnector::new(capacity);
        let output = FakeOutput::default();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();

        let mut config = LiveConfig::default().with_api_key("test-key");
        config.outbound_audio_capacity = capacity;
        tweak(&mut config);

        let mut session = SessionController::new(
            config,
            input.clone(),
            connector.clone(),
            output.clone(),
            playback_rx,
        );
        let notices = session.subscribe();
        Self {
            session,
            input,
            connector,
            output,
            notices,
            playback_tx,
        }
    }

    /// Start and complete setup.
    async fn open(&mut self) {
        self.session.start().await.expect("start");
        assert_eq!(self.session.state(), SessionState::Connecting);
        self.push(TransportEvent::Opened);
        self.session.drain_ready();
        assert_eq!(self.session.state(), SessionState::Open);
    }

    fn push(&self, event: TransportEvent) {
        let remotes = self.connector.remotes.borrow();
        let remote = remotes.last().expect("connected");
        remote.events.send(event).expect("session listening");
    }

    fn receive(&mut self, message: Value) {
        let parsed = ServerMessage::parse(&message.to_string()).expect("valid server message");
        self.push(TransportEvent::Message(parsed));
        self.session.drain_ready();
    }

    fn control_messages(&self) -> Vec<Value> {
        let mut remotes = self.connector.remotes.borrow_mut();
        let remote = remotes.last_mut().expect("connected");
        let mut out = Vec::new();
        while let Ok(message) = remote.control.try_recv() {
            out.push(serde_json::to_value(&message).unwrap());
        }
        out
    }

    fn notices(&mut self) -> Vec<SessionNotice> {
        let mut out = Vec::new();
        while let Ok(n) = self.notices.try_recv() {
            out.push(n);
        }
        out
    }
}

/// Base64 PCM16 for `secs` of audio at 24 kHz mono.
fn speech(secs: f64) -> String {
    codec::encode_base64(&vec![0.1; (24000.0 * secs) as usize])
}

fn audio_part(data: String) -> Value {
    json!({"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": data}})
}

fn tool_call(id: &str, name: &str, args: Value) -> Value {
    json!({"toolCall": {"functionCalls": [{"id": id, "name": name, "args": args}]}})
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_acquires_device_and_opens_on_setup_complete() {
    let mut h = Harness::new();
    h.open().await;

    assert!(h.session.is_active());
    assert_eq!(h.input.acquired.get(), 1);

    {
        let setups = h.connector.setups.borrow();
        assert_eq!(setups.len(), 1);
        assert_eq!(setups[0].generation_config.response_modalities, vec!["AUDIO".to_string()]);
        assert_eq!(setups[0].tools[0].function_declarations.len(), 2);
    }

    let states: Vec<_> = h
        .notices()
        .into_iter()
        .filter_map(|n| match n {
            SessionNotice::StateChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(states, [SessionState::Connecting, SessionState::Open]);
}

#[tokio::test]
async fn stop_twice_is_harmless_and_releases_everything() {
    let mut h = Harness::new();
    h.open().await;
    h.session.set_muted(true);

    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.input.released.get(), 1);
    assert!(!h.session.is_muted());
    assert!(h.connector.remotes.borrow_mut()[0].is_closed());

    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.input.released.get(), 1);
}

#[tokio::test]
async fn stop_while_idle_is_a_no_op() {
    let mut h = Harness::new();
    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.notices().is_empty());
}

#[tokio::test]
async fn stop_while_connecting_releases_partial_session() {
    let mut h = Harness::new();
    h.session.start().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Connecting);

    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.input.released.get(), 1);
    assert!(h.connector.remotes.borrow_mut()[0].is_closed());
}

#[tokio::test]
async fn refused_connection_releases_device_and_reports_first() {
    let mut h = Harness::new();
    h.connector.refuse.set(true);

    let err = h.session.start().await.unwrap_err();
    assert!(matches!(err, LiveError::Transport(_)));
    assert_eq!(h.session.state(), SessionState::Errored);
    assert_eq!(h.input.acquired.get(), 1);
    assert_eq!(h.input.released.get(), 1);

    let notices = h.notices();
    let error_at = notices
        .iter()
        .position(|n| matches!(n, SessionNotice::Error { kind: ErrorKind::Transport, .. }))
        .expect("error notice");
    let errored_at = notices
        .iter()
        .position(|n| matches!(n, SessionNotice::StateChanged { to: SessionState::Errored, .. }))
        .expect("errored transition");
    assert!(error_at < errored_at);

    // restartable
    h.connector.refuse.set(false);
    h.open().await;
}

#[tokio::test]
async fn permission_denied_is_reported_distinctly_and_leaves_idle() {
    let mut h = Harness::new();
    *h.input.fail_with.borrow_mut() = Some(LiveError::PermissionDenied("blocked".into()));

    let err = h.session.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.connector.setups.borrow().is_empty());

    let message = h.notices().into_iter().find_map(|n| match n {
        SessionNotice::Error { kind, message, .. } => Some((kind, message)),
        _ => None,
    });
    let (kind, message) = message.expect("error notice");
    assert_eq!(kind, ErrorKind::PermissionDenied);
    assert!(message.contains("Microphone access"));
}

#[tokio::test]
async fn missing_api_key_fails_before_touching_devices() {
    let input = FakeInput::default();
    let connector = FakeConnector::new(4);
    let (_tx, rx) = mpsc::unbounded_channel();
    let mut session = SessionController::new(
        LiveConfig::default().with_api_key(""),
        input.clone(),
        connector.clone(),
        FakeOutput::default(),
        rx,
    );

    let err = session.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(input.acquired.get(), 0);
}

#[tokio::test]
async fn transport_error_while_open_tears_down_before_errored() {
    let mut h = Harness::new();
    h.open().await;
    h.receive(json!({"serverContent": {"modelTurn": {"parts": [
        audio_part(speech(0.1)), audio_part(speech(0.1))
    ]}}}));
    assert_eq!(h.session.playback().active_count(), 2);
    h.notices();

    h.push(TransportEvent::Error(LiveError::Transport("reset by peer".into())));
    h.session.drain_ready();

    assert_eq!(h.session.state(), SessionState::Errored);
    assert_eq!(h.session.playback().active_count(), 0);
    assert_eq!(h.output.stopped.borrow().len(), 2);
    assert_eq!(h.input.released.get(), 1);

    let notices = h.notices();
    assert!(matches!(notices[0], SessionNotice::Error { kind: ErrorKind::Transport, .. }));
    assert!(matches!(
        notices[1],
        SessionNotice::StateChanged { from: SessionState::Open, to: SessionState::Errored }
    ));

    h.session.stop();
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn unexpected_close_is_a_transport_error() {
    let mut h = Harness::new();
    h.open().await;
    h.push(TransportEvent::Closed { reason: Some("1011 internal".into()) });
    h.session.drain_ready();
    assert_eq!(h.session.state(), SessionState::Errored);
    assert_eq!(h.input.released.get(), 1);
}

#[tokio::test]
async fn rejected_handshake_is_a_configuration_error_and_leaves_idle() {
    use tokio_tungstenite::tungstenite::{http, Error as WsError};

    let mut h = Harness::new();
    let response = http::Response::builder()
        .status(403)
        .body(Some(b"API key not valid".to_vec()))
        .unwrap();
    *h.connector.fail_with.borrow_mut() = Some(LiveError::from(WsError::Http(response)));

    let err = h.session.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.input.released.get(), 1);
    assert!(h
        .notices()
        .iter()
        .any(|n| matches!(n, SessionNotice::Error { kind: ErrorKind::Configuration, .. })));

    h.open().await;
}

#[tokio::test]
async fn close_before_setup_complete_is_a_configuration_error_and_leaves_idle() {
    let mut h = Harness::new();
    h.session.start().await.unwrap();
    h.notices();

    h.push(TransportEvent::Closed { reason: Some("1008 models/x is not found".into()) });
    h.session.drain_ready();

    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.input.released.get(), 1);
    let notices = h.notices();
    let message = notices.iter().find_map(|n| match n {
        SessionNotice::Error { kind: ErrorKind::Configuration, message, .. } => Some(message.clone()),
        _ => None,
    });
    assert!(message.expect("configuration notice").contains("models/x is not found"));
    assert!(matches!(
        notices.last(),
        Some(SessionNotice::StateChanged { from: SessionState::Connecting, to: SessionState::Idle })
    ));

    h.open().await;
}

#[tokio::test]
async fn tool_call_before_setup_complete_is_still_answered() {
    let mut h = Harness::new();
    h.session.start().await.unwrap();

    h.receive(tool_call("early-1", "save_memory", json!({"key": "k", "value": "v"})));

    let sent = h.control_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["toolResponse"]["functionResponses"][0]["id"], "early-1");
    assert_eq!(h.session.memories().len(), 1);
    assert_eq!(h.session.state(), SessionState::Connecting);
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

#[tokio::test]
async fn frames_flow_only_while_open_and_unmuted() {
    let mut h = Harness::new();
    h.session.start().await.unwrap();

    h.input.push_frame(vec![0.2; 64]);
    h.session.drain_ready();
    assert_eq!(h.session.stats().frames_forwarded, 0);

    h.push(TransportEvent::Opened);
    h.session.drain_ready();
    h.input.push_frame(vec![0.2; 64]);
    h.session.drain_ready();
    assert_eq!(h.session.stats().frames_forwarded, 1);
    assert!((h.session.level() - 0.2).abs() < 1e-6);

    h.session.set_muted(true);
    h.input.push_frame(vec![0.8; 64]);
    h.session.drain_ready();
    assert_eq!(h.session.stats().frames_forwarded, 1);
    assert_eq!(h.session.stats().frames_dropped, 1);
    assert!((h.session.level() - 0.2).abs() < 1e-6);

    let mut remotes = h.connector.remotes.borrow_mut();
    let first = remotes[0].audio.try_recv().expect("one frame");
    assert!(matches!(first, ClientMessage::RealtimeInput(_)));
    assert!(remotes[0].audio.try_recv().is_err());
}

#[tokio::test]
async fn full_outbound_queue_drops_frames_but_not_tool_responses() {
    let mut h = Harness::with_capacity(2);
    h.open().await;

    for _ in 0..5 {
        h.input.push_frame(vec![0.1; 32]);
    }
    h.session.drain_ready();
    assert_eq!(h.session.stats().frames_forwarded, 2);
    assert_eq!(h.session.stats().frames_dropped, 3);

    h.receive(tool_call("c9", "save_memory", json!({"key": "k", "value": "v"})));
    assert_eq!(h.control_messages().len(), 1);
    assert_eq!(h.session.state(), SessionState::Open);
}

#[tokio::test]
async fn drain_ready_empties_a_long_backlog_in_one_call() {
    let mut h = Harness::with_config(64, |c| c.capture_queue_capacity = 512);
    h.open().await;

    for _ in 0..300 {
        h.input.push_frame(vec![0.1; 16]);
    }
    let handled = h.session.drain_ready();

    assert_eq!(handled, 300);
    let stats = h.session.stats();
    assert_eq!(stats.frames_forwarded + stats.frames_dropped, 300);
    assert_eq!(stats.frames_forwarded, 64);
}

// ---------------------------------------------------------------------------
// Inbound handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn interruption_flushes_and_next_segment_starts_at_device_clock() {
    let mut h = Harness::new();
    h.open().await;

    h.receive(json!({"serverContent": {"modelTurn": {"parts": [
        audio_part(speech(0.5)), audio_part(speech(0.5))
    ]}}}));
    {
        let scheduled = h.output.scheduled.borrow();
        assert_eq!(scheduled.len(), 2);
        assert_eq!(scheduled[0].1, 0.0);
        assert!((scheduled[1].1 - 0.5).abs() < 1e-9);
    }

    h.output.now.set(0.2);
    h.receive(json!({"serverContent": {"interrupted": true}}));
    assert_eq!(h.session.playback().active_count(), 0);
    assert_eq!(h.session.playback().cursor(), 0.0);
    assert_eq!(h.output.stopped.borrow().len(), 2);
    assert!(h
        .notices()
        .iter()
        .any(|n| matches!(n, SessionNotice::Interrupted { stopped: 2 })));

    h.receive(json!({"serverContent": {"modelTurn": {"parts": [audio_part(speech(0.1))]}}}));
    let scheduled = h.output.scheduled.borrow();
    assert_eq!(scheduled.last().unwrap().1, 0.2);
}

#[tokio::test]
async fn interruption_and_audio_in_one_message_keeps_new_audio() {
    let mut h = Harness::new();
    h.open().await;
    h.receive(json!({"serverContent": {"modelTurn": {"parts": [audio_part(speech(0.5))]}}}));

    h.receive(json!({"serverContent": {
        "interrupted": true,
        "modelTurn": {"parts": [audio_part(speech(0.1))]}
    }}));
    assert_eq!(h.output.stopped.borrow().len(), 1);
    assert_eq!(h.session.playback().active_count(), 1);
    assert_eq!(h.session.stats().segments_enqueued, 2);
}

#[tokio::test]
async fn transcription_fragments_become_ordered_turns() {
    let mut h = Harness::new();
    h.open().await;

    h.receive(json!({"serverContent": {"outputTranscription": {"text": "hel"}}}));
    h.receive(json!({"serverContent": {"inputTranscription": {"text": "hi "}}}));
    h.receive(json!({"serverContent": {"inputTranscription": {"text": "there"}}}));
    h.receive(json!({"serverContent": {"outputTranscription": {"text": "lo"}, "turnComplete": true}}));

    let turns = h.session.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].text, "hi there");
    assert_eq!(turns[1].role, Role::Companion);
    assert_eq!(turns[1].text, "hello");
    assert_eq!(turns[1].mode, Some(PersonaMode::Neutral));
    assert_eq!(h.session.pending_transcript(), ("", ""));

    h.receive(json!({"serverContent": {"turnComplete": true}}));
    assert_eq!(h.session.turns().len(), 2);
}

#[tokio::test]
async fn save_memory_appends_once_and_answers_with_call_id() {
    let mut h = Harness::new();
    h.open().await;

    h.receive(tool_call("call-1", "save_memory", json!({"key": "exam_date", "value": "Friday"})));

    assert_eq!(h.session.memories().len(), 1);
    assert_eq!(h.session.memories()[0].key, "exam_date");
    assert_eq!(h.session.memories()[0].value, "Friday");

    let sent = h.control_messages();
    assert_eq!(sent.len(), 1);
    let responses = sent[0]["toolResponse"]["functionResponses"].as_array().unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], "call-1");
    assert_eq!(responses[0]["response"]["result"], "Memory saved.");
    assert_eq!(h.session.stats().tool_calls_answered, 1);
}

#[tokio::test]
async fn duplicate_memory_keys_are_kept() {
    let mut h = Harness::new();
    h.open().await;
    h.receive(tool_call("a", "save_memory", json!({"key": "exam_date", "value": "Friday"})));
    h.receive(tool_call("b", "save_memory", json!({"key": "exam_date", "value": "Monday"})));
    assert_eq!(h.session.memories().len(), 2);
}

#[tokio::test]
async fn persona_switch_tags_later_turns_and_bogus_mode_is_rejected() {
    let mut h = Harness::new();
    h.open().await;

    h.receive(tool_call("m1", "set_persona_mode", json!({"mode": "Creative"})));
    assert_eq!(h.session.persona(), PersonaMode::Creative);

    h.receive(tool_call("m2", "set_persona_mode", json!({"mode": "Bogus"})));
    assert_eq!(h.session.persona(), PersonaMode::Creative);

    let sent = h.control_messages();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["toolResponse"]["functionResponses"][0]["response"]["result"], "Mode switched to Creative.");
    let rejected = &sent[1]["toolResponse"]["functionResponses"][0];
    assert_eq!(rejected["id"], "m2");
    assert!(rejected["response"]["error"].is_string());

    h.receive(json!({"serverContent": {"outputTranscription": {"text": "once upon a time"}, "turnComplete": true}}));
    assert_eq!(h.session.turns()[0].mode, Some(PersonaMode::Creative));
    assert_eq!(h.session.state(), SessionState::Open);
}

#[tokio::test]
async fn batched_calls_are_each_answered_in_one_response() {
    let mut h = Harness::new();
    h.open().await;
    h.receive(json!({"toolCall": {"functionCalls": [
        {"id": "a", "name": "save_memory", "args": {"key": "goal", "value": "run 5k"}},
        {"id": "b", "name": "launch_rocket", "args": {}},
        {"id": "c", "name": "set_persona_mode", "args": {"mode": "Professional"}}
    ]}}));

    let sent = h.control_messages();
    let ids: Vec<_> = sent[0]["toolResponse"]["functionResponses"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(h.session.persona(), PersonaMode::Professional);
    assert_eq!(h.session.stats().tool_calls_answered, 3);
}

#[tokio::test]
async fn malformed_audio_payload_is_skipped() {
    let mut h = Harness::new();
    h.open().await;

    // three bytes: not a whole PCM16 sample
    h.receive(json!({"serverContent": {"modelTurn": {"parts": [
        audio_part("AAAA".to_string()),
        audio_part(speech(0.1))
    ]}}}));

    assert_eq!(h.session.state(), SessionState::Open);
    assert_eq!(h.session.stats().decode_failures, 1);
    assert_eq!(h.session.stats().segments_enqueued, 1);
}

#[tokio::test]
async fn audio_at_an_unexpected_rate_counts_as_a_decode_failure() {
    let mut h = Harness::new();
    h.open().await;

    h.receive(json!({"serverContent": {"modelTurn": {"parts": [
        {"inlineData": {"mimeType": "audio/pcm;rate=16000", "data": speech(0.1)}},
        audio_part(speech(0.1))
    ]}}}));

    assert_eq!(h.session.stats().decode_failures, 1);
    assert_eq!(h.session.stats().segments_enqueued, 1);
    assert_eq!(h.output.scheduled.borrow().len(), 1);
}

#[tokio::test]
async fn mute_leaves_inbound_handling_untouched() {
    let mut h = Harness::new();
    h.open().await;
    h.session.set_muted(true);

    h.receive(json!({"serverContent": {
        "inputTranscription": {"text": "remember my exam"},
        "outputTranscription": {"text": "noted"},
        "turnComplete": true
    }}));
    h.receive(tool_call("muted-1", "save_memory", json!({"key": "exam", "value": "Friday"})));
    h.receive(json!({"serverContent": {"modelTurn": {"parts": [audio_part(speech(0.1))]}}}));

    assert!(h.session.is_muted());
    assert_eq!(h.session.turns().len(), 2);
    assert_eq!(h.session.memories().len(), 1);
    let sent = h.control_messages();
    assert_eq!(sent[0]["toolResponse"]["functionResponses"][0]["id"], "muted-1");
    assert_eq!(h.session.stats().segments_enqueued, 1);
    assert_eq!(h.session.playback().active_count(), 1);
}

#[tokio::test]
async fn playback_completion_retires_segment() {
    let mut h = Harness::new();
    h.open().await;
    h.receive(json!({"serverContent": {"modelTurn": {"parts": [audio_part(speech(0.1))]}}}));
    let id = h.output.scheduled.borrow()[0].0;

    h.playback_tx.send(id).unwrap();
    h.session.drain_ready();
    assert_eq!(h.session.playback().active_count(), 0);
}

#[tokio::test]
async fn go_away_is_surfaced_without_closing() {
    let mut h = Harness::new();
    h.open().await;
    h.notices();
    h.push(TransportEvent::GoAway { time_left: Some("30s".into()) });
    h.session.drain_ready();
    assert_eq!(h.session.state(), SessionState::Open);
    assert!(matches!(
        h.notices().as_slice(),
        [SessionNotice::GoAway { time_left: Some(t) }] if t == "30s"
    ));
}

#[tokio::test]
async fn memory_and_persona_survive_restart() {
    let mut h = Harness::new();
    h.open().await;
    h.receive(tool_call("a", "save_memory", json!({"key": "name", "value": "Sam"})));
    h.receive(tool_call("b", "set_persona_mode", json!({"mode": "Academic"})));
    h.session.stop();

    h.open().await;
    assert_eq!(h.session.memories().len(), 1);
    assert_eq!(h.session.persona(), PersonaMode::Academic);
    assert_eq!(h.input.acquired.get(), 2);
}
