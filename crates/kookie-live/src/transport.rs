//! Streaming channel to the remote conversational model.
//!
//! ```text
//!   session task                         socket tasks
//!   ────────────                         ────────────
//!   audio   (bounded, try_send) ───┐
//!                                  ├──▶  writer ──▶ websocket
//!   control (unbounded) ───────────┘     (control first)
//!
//!   inbound ◀─────────────────────────── reader ◀── websocket
//!   close   ───────────────────────────▶ writer (close frame)
//! ```
//!
//! The session only ever sees a [`LiveChannel`]; the socket lives in two
//! spawned tasks so sending never suspends the session's event handling.

use crate::config::LiveConfig;
use crate::error::{LiveError, LiveResult};
use crate::protocol::{
    ClientMessage, Content, GenerationConfig, Part, PrebuiltVoiceConfig, ServerMessage, Setup,
    SpeechConfig, ToolSet, TranscriptionConfig, VoiceConfig,
};
use crate::tools;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything the reader task can report to the session, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// The remote side accepted the setup message.
    Opened,
    Message(ServerMessage),
    /// The server announced it will close the connection soon.
    GoAway { time_left: Option<String> },
    /// The channel closed. `reason` comes from the close frame, when there was one.
    Closed { reason: Option<String> },
    Error(LiveError),
}

/// Session side of an open channel.
#[derive(Debug)]
pub struct LiveChannel {
    audio: mpsc::Sender<ClientMessage>,
    control: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    close: Option<oneshot::Sender<()>>,
}

/// Far side of a [`LiveChannel`]: what the socket tasks (or a test double) hold.
#[derive(Debug)]
pub struct RemoteEnd {
    pub audio: mpsc::Receiver<ClientMessage>,
    pub control: mpsc::UnboundedReceiver<ClientMessage>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub close: oneshot::Receiver<()>,
}

impl RemoteEnd {
    /// True once the session closed or dropped its end.
    pub fn is_closed(&mut self) -> bool {
        !matches!(self.close.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    }
}

impl LiveChannel {
    /// Create a connected pair. `audio_capacity` bounds queued capture frames.
    pub fn pair(audio_capacity: usize) -> (LiveChannel, RemoteEnd) {
        let (audio_tx, audio_rx) = mpsc::channel(audio_capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        (
            LiveChannel {
                audio: audio_tx,
                control: control_tx,
                inbound: events_rx,
                close: Some(close_tx),
            },
            RemoteEnd {
                audio: audio_rx,
                control: control_rx,
                events: events_tx,
                close: close_rx,
            },
        )
    }

    pub fn audio(&self) -> &mpsc::Sender<ClientMessage> {
        &self.audio
    }

    /// Queue a control message (tool responses). Never dropped while the channel is up.
    pub fn send_control(&self, message: ClientMessage) -> LiveResult<()> {
        self.control
            .send(message)
            .map_err(|_| LiveError::Transport("channel closed while sending".to_string()))
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Next event if one is queued. A reader that vanished without a word reads as `Closed`.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        match self.inbound.try_recv() {
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(TransportEvent::Closed { reason: None }),
        }
    }

    /// Ask the writer to send a close frame. Idempotent.
    pub fn close(&mut self) {
        if let Some(tx) = self.close.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens channels to the remote model.
#[async_trait(?Send)]
pub trait Connector {
    async fn connect(&self, setup: Setup) -> LiveResult<LiveChannel>;
}

/// Setup payload for a session: audio out, voice, instruction, tools, transcription both ways.
pub fn session_setup(config: &LiveConfig) -> Setup {
    Setup {
        model: config.model_resource(),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice.clone(),
                    },
                },
            },
        },
        system_instruction: Content {
            parts: vec![Part {
                text: Some(config.system_instruction.clone()),
                inline_data: None,
            }],
        },
        tools: vec![ToolSet {
            function_declarations: tools::declarations(),
        }],
        input_audio_transcription: TranscriptionConfig::default(),
        output_audio_transcription: TranscriptionConfig::default(),
    }
}

/// Websocket connector for the Gemini Live API.
#[derive(Clone)]
pub struct GeminiConnector {
    endpoint: String,
    url: String,
    audio_capacity: usize,
}

impl GeminiConnector {
    pub fn new(config: &LiveConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            url: config.connect_url(),
            audio_capacity: config.outbound_audio_capacity,
        }
    }
}

#[async_trait(?Send)]
impl Connector for GeminiConnector {
    async fn connect(&self, setup: Setup) -> LiveResult<LiveChannel> {
        info!(endpoint = %self.endpoint, model = %setup.model, "🔌 Connecting to live endpoint");

        let (socket, response) = connect_async(self.url.as_str()).await?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (mut sink, stream) = socket.split();
        let setup_json = ClientMessage::Setup(setup).to_json()?;
        sink.send(Message::Text(setup_json)).await?;

        let (channel, remote) = LiveChannel::pair(self.audio_capacity);
        let RemoteEnd {
            audio,
            control,
            events,
            close,
        } = remote;

        tokio::spawn(write_loop(sink, audio, control, close, events.clone()));
        tokio::spawn(read_loop(stream, events));

        info!("✅ Setup sent, waiting for the server to accept it");
        Ok(channel)
    }
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut audio: mpsc::Receiver<ClientMessage>,
    mut control: mpsc::UnboundedReceiver<ClientMessage>,
    mut close: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = &mut close => break,
            Some(m) = control.recv() => m,
            Some(m) = audio.recv() => m,
            else => break,
        };

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("dropping unserializable outbound message: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text)).await {
            let _ = events.send(TransportEvent::Error(e.into()));
            return;
        }
    }

    debug!("writer closing websocket");
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<Socket>, events: mpsc::UnboundedSender<TransportEvent>) {
    while let Some(frame) = stream.next().await {
        let delivered = match frame {
            Ok(Message::Text(text)) => forward(&text, &events),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => forward(text, &events),
                Err(_) => {
                    warn!(bytes = bytes.len(), "ignoring non-UTF-8 binary frame");
                    true
                }
            },
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                info!(reason = ?reason, "server closed the channel");
                let _ = events.send(TransportEvent::Closed { reason });
                return;
            }
            Ok(_) => true,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.into()));
                return;
            }
        };
        if !delivered {
            // Session dropped its receiver.
            return;
        }
    }
    let _ = events.send(TransportEvent::Closed { reason: None });
}

/// Parse one inbound frame and split it into events. Returns false once the
/// session has gone away.
fn forward(text: &str, events: &mpsc::UnboundedSender<TransportEvent>) -> bool {
    let message = match ServerMessage::parse(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("ignoring malformed server message: {}", e);
            return true;
        }
    };
    split_events(message)
        .into_iter()
        .all(|event| events.send(event).is_ok())
}

pub(crate) fn split_events(mut message: ServerMessage) -> Vec<TransportEvent> {
    let mut out = Vec::with_capacity(2);
    if message.setup_complete.take().is_some() {
        out.push(TransportEvent::Opened);
    }
    if let Some(go_away) = message.go_away.take() {
        out.push(TransportEvent::GoAway {
            time_left: go_away.time_left,
        });
    }
    if message.server_content.is_some()
        || message.tool_call.is_some()
        || message.tool_call_cancellation.is_some()
    {
        out.push(TransportEvent::Message(message));
    }
    out
}
