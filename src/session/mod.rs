//! Session layer: duplex channel, state machine, and the manager loop
//!
//! One logical conversation at a time. All state lives in a pure reducer
//! driven by a single ordered event queue; the manager executes the effects
//! the reducer returns and owns every capture/playback/channel resource, keyed
//! by the session generation so a stale session can never touch a new one.
//!
//! # Architecture
//!
//! ```text
//! Microphone ──▶ capture thread ──▶ outbound pump ──┐
//!                                                   ▼
//!                                             LiveChannel (WebSocket)
//!                                                   │
//! connect()/disconnect() ──▶ event queue ◀── inbound envelopes
//!                                │
//!                                ▼
//!                       reduce(state, event)
//!                                │
//!                                ▼
//!                    effects ──▶ playback scheduler ──▶ output device
//! ```

pub mod channel;
pub mod machine;
pub mod manager;
pub mod protocol;

pub use channel::LiveChannel;
pub use manager::SessionManager;
pub use protocol::{ClientMessage, ServerMessage};

use crate::audio::AudioError;

/// Externally observable connection state of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error(_) => "error",
        }
    }
}

/// Errors that can occur while opening or running a session
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Microphone or speaker access was denied
    PermissionDenied(String),
    /// Credential, endpoint, or voice parameters are unusable
    ConfigurationError(String),
    /// The duplex channel could not be established
    ChannelOpenFailure(String),
    /// The channel failed after it was established
    ChannelRuntimeError(String),
    /// An inbound payload could not be decoded (non-fatal; logged and dropped)
    MalformedPayload(String),
    /// An audio device failed to open or stream
    DeviceError(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::PermissionDenied(e) => write!(f, "Audio access denied: {}", e),
            SessionError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            SessionError::ChannelOpenFailure(e) => {
                write!(f, "Failed to open session channel: {}", e)
            }
            SessionError::ChannelRuntimeError(e) => write!(f, "Session channel failed: {}", e),
            SessionError::MalformedPayload(e) => write!(f, "Malformed inbound payload: {}", e),
            SessionError::DeviceError(e) => write!(f, "Audio device error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::PermissionDenied(e) => SessionError::PermissionDenied(e),
            AudioError::MalformedPayload(e) => SessionError::MalformedPayload(e),
            AudioError::NoInputDevice | AudioError::NoOutputDevice => {
                SessionError::DeviceError(err.to_string())
            }
            AudioError::StreamCreationFailed(e) => SessionError::DeviceError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::ConfigurationError("no credential".to_string());
        assert!(err.to_string().contains("no credential"));

        let err = SessionError::ChannelOpenFailure("timeout".to_string());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_audio_error_mapping() {
        let err: SessionError = AudioError::NoInputDevice.into();
        assert!(matches!(err, SessionError::DeviceError(_)));

        let err: SessionError = AudioError::PermissionDenied("denied".to_string()).into();
        assert!(matches!(err, SessionError::PermissionDenied(_)));

        let err: SessionError = AudioError::MalformedPayload("bad".to_string()).into();
        assert!(matches!(err, SessionError::MalformedPayload(_)));
    }
}
