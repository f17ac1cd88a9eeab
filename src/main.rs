//! Command-line entry point: open a voice session and talk until Ctrl-C.

use voiceloop::{ConnectionState, SessionManager, Tone, VoiceConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = voice_config_from_env();
    log::info!(
        "Starting voice session (voice: {}, speed: {}, tone: {})",
        config.voice,
        config.speed,
        config.tone.as_str()
    );

    let manager = SessionManager::new();

    // Log state transitions in the background
    let mut state_rx = manager.state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            match &state {
                ConnectionState::Error(message) => log::error!("Session error: {}", message),
                other => log::info!("Session state: {}", other.as_str()),
            }
        }
    });

    if let Err(e) = manager.connect(config).await {
        log::error!("Could not start session: {}", e);
        std::process::exit(1);
    }

    log::info!("Connected. Speak into the microphone; Ctrl-C to hang up.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
    }

    log::info!("Hanging up...");
    if let Err(e) = manager.disconnect().await {
        log::warn!("Disconnect: {}", e);
    }
    manager.shutdown();
}

fn voice_config_from_env() -> VoiceConfig {
    let voice = std::env::var("VOICELOOP_VOICE").unwrap_or_else(|_| "aria".to_string());
    let speed = std::env::var("VOICELOOP_SPEED")
        .ok()
        .and_then(|v| v.parse::<f32>().ok())
        .unwrap_or(1.0);
    let tone = match std::env::var("VOICELOOP_TONE").as_deref() {
        Ok("warm") => Tone::Warm,
        Ok("energetic") => Tone::Energetic,
        Ok("calm") => Tone::Calm,
        Ok("formal") => Tone::Formal,
        _ => Tone::Neutral,
    };
    let base = std::env::var("VOICELOOP_INSTRUCTION").unwrap_or_default();

    VoiceConfig::new(voice)
        .with_speed(speed)
        .with_tone(tone)
        .with_base_instruction(base)
}
