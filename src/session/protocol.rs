//! Duplex-channel wire envelopes
//!
//! JSON messages exchanged with the conversational speech service over the
//! WebSocket. Audio rides inside the JSON as base64-encoded little-endian
//! PCM16.
//!
//! # Protocol Overview
//!
//! 1. Connect to the live endpoint with the credential header
//! 2. Send `session.setup` (model, voice, system instruction)
//! 3. Receive `session.opened`
//! 4. Stream microphone audio via `input.audio`; advisory text via `input.text`
//! 5. Receive synthesized speech via `audio.delta`, flush cues via
//!    `playback.interrupted`, turn boundaries via `turn.complete`

use serde::{Deserialize, Serialize};

use crate::audio::{to_base64, PLAYBACK_SAMPLE_RATE};

/// Session parameters sent in the setup envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    /// Conversational model to run the session against
    pub model: String,

    /// Named voice identity
    pub voice: String,

    /// Output modality - always audio for a voice session
    pub output_modality: String,

    /// Composed system instruction (base + tone + pacing + style)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

/// Session information returned by the service
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    /// Service-assigned session ID
    pub id: String,

    #[serde(default)]
    pub model: String,
}

/// Error information from the service
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub error_type: String,

    #[serde(default)]
    pub code: Option<String>,

    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Client Messages (sent TO the service)
// ============================================================================

/// Messages sent from the client to the service
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Configure the session; must be the first message on the channel
    #[serde(rename = "session.setup")]
    Setup { session: SetupConfig },

    /// One block of microphone audio
    #[serde(rename = "input.audio")]
    Audio {
        /// Base64-encoded PCM16 audio data
        audio: String,
        /// Sample rate the audio was captured at
        sample_rate: u32,
    },

    /// Advisory text injected into the conversation
    #[serde(rename = "input.text")]
    Text { text: String },
}

impl ClientMessage {
    pub fn setup(model: &str, voice: &str, system_instruction: Option<String>) -> Self {
        Self::Setup {
            session: SetupConfig {
                model: model.to_string(),
                voice: voice.to_string(),
                output_modality: "audio".to_string(),
                system_instruction,
            },
        }
    }

    /// Wrap encoded PCM16 bytes in an audio envelope
    pub fn audio(pcm: &[u8], sample_rate: u32) -> Self {
        Self::Audio {
            audio: to_base64(pcm),
            sample_rate,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

// ============================================================================
// Server Messages (received FROM the service)
// ============================================================================

/// Messages received from the service
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Session is established and ready for audio
    #[serde(rename = "session.opened")]
    Opened { session: SessionInfo },

    /// One chunk of synthesized speech
    #[serde(rename = "audio.delta")]
    AudioDelta {
        /// Base64-encoded PCM16 audio data
        audio: String,
        /// Sample rate of the chunk; defaults to the service's output rate
        #[serde(default = "default_output_rate")]
        sample_rate: u32,
    },

    /// The user barged in; flush everything queued for playback
    #[serde(rename = "playback.interrupted")]
    Interrupted,

    /// The remote speaker finished its turn
    #[serde(rename = "turn.complete")]
    TurnComplete,

    /// An error occurred
    #[serde(rename = "error")]
    Error { error: ErrorInfo },

    /// The service is closing the session
    #[serde(rename = "session.closed")]
    Closed,

    /// Catch-all for message types we don't handle
    /// This prevents deserialization failures for unknown types
    #[serde(other)]
    Unknown,
}

fn default_output_rate() -> u32 {
    PLAYBACK_SAMPLE_RATE
}

impl ServerMessage {
    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error { .. })
    }

    /// Extract session ID if this is an opened message
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Opened { session } => Some(&session.id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};

    #[test]
    fn test_setup_serialization() {
        let msg = ClientMessage::setup(
            "voiceloop-live-1",
            "aria",
            Some("Speak in a warm tone.".to_string()),
        );
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"session.setup\""));
        assert!(json.contains("\"model\":\"voiceloop-live-1\""));
        assert!(json.contains("\"voice\":\"aria\""));
        assert!(json.contains("\"output_modality\":\"audio\""));
        assert!(json.contains("Speak in a warm tone."));
    }

    #[test]
    fn test_setup_omits_empty_instruction() {
        let msg = ClientMessage::setup("voiceloop-live-1", "aria", None);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("system_instruction"));
    }

    #[test]
    fn test_audio_envelope_is_base64() {
        let msg = ClientMessage::audio(&[0x34, 0x12, 0x78, 0x56], 16_000);
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"input.audio\""));
        assert!(json.contains("\"sample_rate\":16000"));

        if let ClientMessage::Audio { audio, .. } = msg {
            assert_eq!(STANDARD.decode(&audio).unwrap(), vec![0x34, 0x12, 0x78, 0x56]);
        } else {
            panic!("Expected Audio");
        }
    }

    #[test]
    fn test_opened_deserialization() {
        let json = r#"{
            "type": "session.opened",
            "session": {
                "id": "sess_42",
                "model": "voiceloop-live-1"
            }
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.session_id(), Some("sess_42"));
    }

    #[test]
    fn test_audio_delta_deserialization() {
        let json = r#"{
            "type": "audio.delta",
            "audio": "AAAA",
            "sample_rate": 24000
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::AudioDelta { audio, sample_rate } => {
                assert_eq!(audio, "AAAA");
                assert_eq!(sample_rate, 24_000);
            }
            _ => panic!("Expected AudioDelta"),
        }
    }

    #[test]
    fn test_audio_delta_default_sample_rate() {
        let json = r#"{"type": "audio.delta", "audio": "AAAA"}"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::AudioDelta { sample_rate, .. } => {
                assert_eq!(sample_rate, PLAYBACK_SAMPLE_RATE);
            }
            _ => panic!("Expected AudioDelta"),
        }
    }

    #[test]
    fn test_interrupted_deserialization() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type": "playback.interrupted"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Interrupted));
    }

    #[test]
    fn test_error_deserialization() {
        let json = r#"{
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "code": "invalid_api_key",
                "message": "Invalid API key"
            }
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(msg.is_error());
        match msg {
            ServerMessage::Error { error } => {
                assert_eq!(error.message, "Invalid API key");
                assert_eq!(error.code, Some("invalid_api_key".to_string()));
            }
            _ => panic!("Expected Error"),
        }
    }

    #[test]
    fn test_unknown_message_type() {
        let json = r#"{
            "type": "some.future.message.type",
            "data": "whatever"
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::Unknown));
    }
}
