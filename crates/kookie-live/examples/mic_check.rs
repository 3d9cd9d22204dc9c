//! Example: Microphone check
//!
//! Lists input devices, then captures from the default microphone for a few
//! seconds and prints the level of every frame. No network involved.

use kookie_live::audio::{AudioConfig, CpalInput, InputDevice};
use kookie_live::codec;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🎤 Kookie microphone check");
    for name in CpalInput::list_input_devices()? {
        info!("   input: {}", name);
    }

    let (frames_tx, mut frames_rx) = mpsc::channel(32);
    let mut input = CpalInput::new(AudioConfig::default());
    let handle = match input.acquire(frames_tx) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };

    let deadline = tokio::time::sleep(Duration::from_secs(3));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(frame) = frames_rx.recv() => {
                let level = codec::rms(&frame);
                let bar = "█".repeat((level * 200.0).min(40.0) as usize);
                info!("{:>6.4} {}", level, bar);
            }
        }
    }

    drop(handle);
    info!("✅ Microphone released");
    Ok(())
}
