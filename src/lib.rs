//! voiceloop - real-time bidirectional voice conversation client
//!
//! Bridges a live microphone to a conversational speech service and plays the
//! synthesized replies back with gapless timing, over one persistent duplex
//! WebSocket.
//!
//! # Architecture
//!
//! ```text
//! Microphone ──▶ Capture (16 kHz blocks) ──▶ PCM16/base64 ──┐
//!                      │ RMS meter                           ▼
//!                      ▼                              LiveChannel (WS)
//!                 CaptureLevel                               │
//!                                                            ▼
//! Speaker ◀── PlaybackScheduler (24 kHz) ◀── decode ◀── audio deltas
//!                      │
//!                      ▼
//!                SpectrumFeed (128-bin FFT, ~30fps)
//! ```
//!
//! All lifecycle state lives in a pure reducer ([`session::machine`]) driven
//! by a single event queue; [`SessionManager`] runs the loop and owns every
//! device and channel resource.

pub mod audio;
pub mod config;
pub mod profiles;
pub mod session;
pub mod voice;

pub use audio::{CaptureLevel, SpectrumFeed, SpectrumFrame, SPECTRUM_BINS};
pub use profiles::{ClonedVoiceProfile, ProfileStore};
pub use session::{ConnectionState, SessionError, SessionManager};
pub use voice::{Tone, VoiceConfig};
