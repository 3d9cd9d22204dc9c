//! Kookie Live Daemon (terminal front end)
//!
//! Runs one live voice session against the default microphone and speakers and
//! prints the conversation as it happens. Commands on stdin:
//!
//! - `m` toggle mute
//! - `s` start again after the session stopped or failed
//! - `p` print persona and saved memories
//! - `q` quit

use kookie_live::{
    AudioConfig, CpalInput, GeminiConnector, LiveConfig, LiveError, Role, RodioOutput,
    SessionController, SessionNotice, SessionState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Session = SessionController<CpalInput, GeminiConnector, RodioOutput>;

// cpal and rodio handles are not Send; the whole session stays on this thread.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[kookie-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        eprintln!("{}", e.user_message());
        tracing::error!(error = %e, "kookie daemon exiting");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), LiveError> {
    let config = LiveConfig::load()?;
    config.validate()?;
    tracing::info!(model = %config.model, voice = %config.voice, "Kookie daemon starting");

    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let output = RodioOutput::new(config.output_sample_rate, config.output_channels, done_tx)?;
    let input = CpalInput::new(AudioConfig {
        sample_rate: config.input_sample_rate,
        frame_size: config.frame_size,
    });
    let connector = GeminiConnector::new(&config);

    let mut session: Session = SessionController::new(config, input, connector, output, done_rx);
    let mut notices = session.subscribe();

    session.start().await?;
    println!("Listening. Commands: m = mute, s = start, p = profile, q = quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            alive = session.pump() => {
                if !alive {
                    tracing::warn!("all session sources closed");
                    break;
                }
            }
            Some(notice) = notices.recv() => report(&notice),
            line = lines.next_line() => {
                match line {
                    Ok(Some(cmd)) => {
                        if !command(&mut session, cmd.trim()).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down");
                break;
            }
        }
    }

    session.stop();
    let stats = session.stats();
    tracing::info!(
        frames_forwarded = stats.frames_forwarded,
        frames_dropped = stats.frames_dropped,
        segments = stats.segments_enqueued,
        decode_failures = stats.decode_failures,
        tool_calls = stats.tool_calls_answered,
        turns = session.turns().len(),
        "Kookie daemon stopped"
    );
    Ok(())
}

/// Returns false to quit.
async fn command(session: &mut Session, cmd: &str) -> bool {
    match cmd {
        "q" | "quit" => return false,
        "m" | "mute" => {
            let muted = !session.is_muted();
            session.set_muted(muted);
            println!("{}", if muted { "🔇 muted" } else { "🎤 live" });
        }
        "s" | "start" => match session.state() {
            SessionState::Idle | SessionState::Errored => {
                if let Err(e) = session.start().await {
                    println!("{}", e.user_message());
                }
            }
            other => println!("session is {}", other),
        },
        "p" | "profile" => {
            println!("persona: {}", session.persona());
            for entry in session.memories() {
                println!("  {} = {}", entry.key, entry.value);
            }
        }
        "" => {}
        other => println!("unknown command '{}'", other),
    }
    true
}

fn report(notice: &SessionNotice) {
    match notice {
        SessionNotice::Turn(turn) => {
            let who = match turn.role {
                Role::User => "you".to_string(),
                Role::Companion => match turn.mode {
                    Some(mode) => format!("kookie ({})", mode),
                    None => "kookie".to_string(),
                },
            };
            println!("[{}] {}: {}", turn.timestamp.format("%H:%M:%S"), who, turn.text);
        }
        SessionNotice::MemorySaved(entry) => println!("📝 remembered {} = {}", entry.key, entry.value),
        SessionNotice::PersonaChanged { from, to } => println!("🎭 {} -> {}", from, to),
        SessionNotice::Interrupted { stopped } => {
            tracing::debug!(stopped, "interrupted");
        }
        SessionNotice::GoAway { time_left } => {
            println!("⚠ server is closing the session soon ({})", time_left.as_deref().unwrap_or("unknown"));
        }
        SessionNotice::Error { message, .. } => println!("❌ {} (type 's' to start again)", message),
        SessionNotice::StateChanged { from, to } => {
            tracing::info!(%from, %to, "session state");
        }
    }
}
