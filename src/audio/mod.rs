//! Audio capture, playback scheduling, and the PCM wire codec.

pub mod capture;
pub mod pcm;
pub mod playback;
pub mod spectrum;

pub use capture::{start_capture, CaptureHandle, CaptureLevel};
pub use pcm::{decode_pcm16, encode_pcm16, from_base64, to_base64, AudioChunk};
pub use playback::{PlaybackScheduler, PlaybackStream, SharedClock};
pub use spectrum::{SpectrumFeed, SpectrumFrame, SpectrumTap, SPECTRUM_BINS};

/// Sample rate requested from the microphone. The remote service expects
/// 16 kHz mono PCM16 on the inbound leg.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio delivered by the remote service. Deliberately
/// independent of the capture rate.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples accumulated per outbound block (~256ms at 16 kHz).
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Errors from the audio device layer and the PCM codec.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoOutputDevice,
    PermissionDenied(String),
    StreamCreationFailed(String),
    MalformedPayload(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoOutputDevice => write!(f, "No audio output device found"),
            AudioError::PermissionDenied(e) => write!(f, "Microphone access denied: {}", e),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::MalformedPayload(e) => write!(f, "Malformed audio payload: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}
